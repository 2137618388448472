// 可编辑字段表（添加 / 编辑主机时逐项提示）

use super::catalog::{HostRecord, METHOD_KEY, METHOD_PASSWORD};

/// 单个可编辑字段
pub struct EditableField {
    pub key: &'static str,
    pub label: &'static str,
    /// 回显时是否隐藏当前值
    pub secret: bool,
    pub current: fn(&HostRecord) -> String,
    /// 写入新值，输入无效时返回错误提示
    pub apply: fn(&mut HostRecord, &str) -> Result<(), String>,
}

impl EditableField {
    /// 提示中展示的当前值
    pub fn shown_value(&self, host: &HostRecord) -> String {
        let value = (self.current)(host);
        if self.secret && !value.is_empty() {
            "******".to_string()
        } else {
            value
        }
    }
}

fn required(value: &str, what: &str) -> Result<String, String> {
    let value = value.trim();
    if value.is_empty() {
        Err(format!("{what} cannot be empty"))
    } else {
        Ok(value.to_string())
    }
}

fn parse_port(value: &str) -> Result<i64, String> {
    match value.trim().parse::<i64>() {
        Ok(port) if (1..=65535).contains(&port) => Ok(port),
        _ => Err("port must be a number between 1 and 65535".to_string()),
    }
}

fn parse_method(value: &str) -> Result<String, String> {
    let method = value.trim().to_ascii_lowercase();
    if method == METHOD_PASSWORD || method == METHOD_KEY {
        Ok(method)
    } else {
        Err("method must be 'password' or 'key'".to_string())
    }
}

/// 字段按提示顺序排列
pub static EDITABLE_FIELDS: &[EditableField] = &[
    EditableField {
        key: "name",
        label: "Name",
        secret: false,
        current: |h| h.name.clone(),
        apply: |h, v| {
            h.name = required(v, "name")?;
            Ok(())
        },
    },
    EditableField {
        key: "ip",
        label: "IP",
        secret: false,
        current: |h| h.ip.clone(),
        apply: |h, v| {
            h.ip = required(v, "ip")?;
            Ok(())
        },
    },
    EditableField {
        key: "port",
        label: "Port",
        secret: false,
        current: |h| h.port.to_string(),
        apply: |h, v| {
            h.port = parse_port(v)?;
            Ok(())
        },
    },
    EditableField {
        key: "user",
        label: "User",
        secret: false,
        current: |h| h.user.clone(),
        apply: |h, v| {
            h.user = required(v, "user")?;
            Ok(())
        },
    },
    EditableField {
        key: "password",
        label: "Password",
        secret: true,
        current: |h| h.password.clone(),
        apply: |h, v| {
            h.password = v.to_string();
            Ok(())
        },
    },
    EditableField {
        key: "method",
        label: "Method (password/key)",
        secret: false,
        current: |h| h.method.clone(),
        apply: |h, v| {
            h.method = parse_method(v)?;
            Ok(())
        },
    },
    EditableField {
        key: "key",
        label: "Key path",
        secret: false,
        current: |h| h.key.clone(),
        apply: |h, v| {
            h.key = v.trim().to_string();
            Ok(())
        },
    },
    EditableField {
        key: "alias",
        label: "Alias",
        secret: false,
        current: |h| h.alias.clone(),
        apply: |h, v| {
            h.alias = v.trim().to_string();
            Ok(())
        },
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    fn field(key: &str) -> &'static EditableField {
        EDITABLE_FIELDS
            .iter()
            .find(|f| f.key == key)
            .expect("field exists")
    }

    #[test]
    fn port_rejects_out_of_range() {
        let mut host = HostRecord::default();
        assert!((field("port").apply)(&mut host, "0").is_err());
        assert!((field("port").apply)(&mut host, "abc").is_err());
        assert!((field("port").apply)(&mut host, "65536").is_err());
        assert!((field("port").apply)(&mut host, " 2222 ").is_ok());
        assert_eq!(host.port, 2222);
    }

    #[test]
    fn method_is_normalized() {
        let mut host = HostRecord::default();
        assert!((field("method").apply)(&mut host, "ssh").is_err());
        assert!((field("method").apply)(&mut host, "KEY").is_ok());
        assert_eq!(host.method, "key");
    }

    #[test]
    fn password_is_masked() {
        let host = HostRecord {
            password: "secret".into(),
            ..Default::default()
        };
        assert_eq!(field("password").shown_value(&host), "******");
        assert_eq!(field("password").shown_value(&HostRecord::default()), "");
    }

    #[test]
    fn required_fields_reject_blank() {
        let mut host = HostRecord::default();
        assert!((field("name").apply)(&mut host, "   ").is_err());
        assert!((field("alias").apply)(&mut host, "").is_ok());
    }
}
