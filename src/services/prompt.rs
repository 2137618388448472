// 交互式输入：逐字段提示、校验、有限次重试

use std::io::{self, Write};

use async_trait::async_trait;
use thiserror::Error;

use crate::constants::PROMPT_MAX_ATTEMPTS;
use crate::models::fields::{EditableField, EDITABLE_FIELDS};
use crate::models::HostRecord;

/// 行输入来源（终端 stdin 或测试用的预置输入）
#[async_trait]
pub trait LineSource: Send {
    /// 读取一行（不含换行符），输入结束返回 None
    async fn next_line(&mut self) -> io::Result<Option<String>>;
}

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("Too many invalid attempts for '{0}'")]
    TooManyAttempts(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// 输入 q / exit 取消当前操作
pub fn is_cancel_keyword(input: &str) -> bool {
    let input = input.trim();
    input.eq_ignore_ascii_case("q") || input.eq_ignore_ascii_case("exit")
}

/// 打印提示并读取一行；EOF 或取消关键字返回 None
pub async fn ask<L, W>(input: &mut L, out: &mut W, label: &str) -> io::Result<Option<String>>
where
    L: LineSource + ?Sized,
    W: Write,
{
    write!(out, "{label}: ")?;
    out.flush()?;
    match input.next_line().await? {
        Some(line) if !is_cancel_keyword(&line) => Ok(Some(line.trim().to_string())),
        _ => Ok(None),
    }
}

/// 提示单个字段，空输入保留当前值。返回 false 表示取消
async fn prompt_field<L, W>(
    input: &mut L,
    out: &mut W,
    field: &EditableField,
    host: &mut HostRecord,
) -> Result<bool, PromptError>
where
    L: LineSource + ?Sized,
    W: Write,
{
    for _ in 0..PROMPT_MAX_ATTEMPTS {
        let shown = field.shown_value(host);
        let label = if shown.is_empty() {
            field.label.to_string()
        } else {
            format!("{} [{}]", field.label, shown)
        };
        let Some(value) = ask(input, out, &label).await? else {
            return Ok(false);
        };
        let value = if value.is_empty() {
            (field.current)(host)
        } else {
            value
        };
        match (field.apply)(host, &value) {
            Ok(()) => return Ok(true),
            Err(message) => writeln!(out, "  {message}")?,
        }
    }
    Err(PromptError::TooManyAttempts(field.key.to_string()))
}

/// 依次编辑所有字段。只有全部字段完成才返回新记录，取消返回 None，原记录不受影响
pub async fn edit_host_fields<L, W>(
    input: &mut L,
    out: &mut W,
    host: &HostRecord,
) -> Result<Option<HostRecord>, PromptError>
where
    L: LineSource + ?Sized,
    W: Write,
{
    let mut draft = host.clone();
    for field in EDITABLE_FIELDS {
        if !prompt_field(input, out, field, &mut draft).await? {
            return Ok(None);
        }
    }
    draft.format();
    Ok(Some(draft))
}

/// y / yes 确认
pub async fn confirm<L, W>(input: &mut L, out: &mut W, question: &str) -> io::Result<bool>
where
    L: LineSource + ?Sized,
    W: Write,
{
    let answer = ask(input, out, &format!("{question} (y/N)")).await?;
    Ok(matches!(
        answer.as_deref().map(str::to_ascii_lowercase).as_deref(),
        Some("y" | "yes")
    ))
}
