// 交互菜单：列表展示 + 命令分发

use std::io::{self, Write};

use anyhow::Result;
use tracing::{debug, warn};

use crate::models::{Catalog, HostRecord};
use crate::services::prompt::{ask, confirm, edit_host_fields, is_cancel_keyword, PromptError};
use crate::services::storage::save_catalog;
use crate::ssh::{SessionController, StdinPump};

const HELP: &str = "token: connect | group prefix: fold/unfold | add [prefix] | edit <token> | rm <token> | q: quit";

/// 用户输入解析结果
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Empty,
    Quit,
    Connect(String),
    ToggleGroup(String),
    Add(String),
    Edit(String),
    Remove(String),
    Usage(&'static str),
    Unknown(String),
}

/// 解析一行输入；主机 token 优先于分组前缀
pub fn parse_command(input: &str, catalog: &Catalog) -> Command {
    let input = input.trim();
    if input.is_empty() {
        return Command::Empty;
    }
    if is_cancel_keyword(input) {
        return Command::Quit;
    }

    let mut parts = input.splitn(2, char::is_whitespace);
    let head = parts.next().unwrap_or_default().to_ascii_lowercase();
    let arg = parts.next().map(str::trim).unwrap_or_default().to_string();

    match head.as_str() {
        "add" => return Command::Add(arg),
        "edit" if arg.is_empty() => return Command::Usage("edit <token>"),
        "edit" => return Command::Edit(arg),
        "rm" | "remove" | "del" if arg.is_empty() => return Command::Usage("rm <token>"),
        "rm" | "remove" | "del" => return Command::Remove(arg),
        _ => {}
    }

    if catalog.resolve(input).is_some() {
        Command::Connect(input.to_string())
    } else if catalog.find_group(input).is_some() {
        Command::ToggleGroup(input.to_string())
    } else {
        Command::Unknown(input.to_string())
    }
}

/// 主机列表文本；折叠的分组只显示标题
pub fn render_listing(catalog: &Catalog) -> String {
    let mut out = String::new();
    for (i, host) in catalog.servers.iter().enumerate() {
        out.push_str(&host.display_line(&(i + 1).to_string(), catalog.show_detail));
        out.push('\n');
    }
    for group in &catalog.groups {
        if group.collapse {
            out.push_str(&format!(
                " [{}]\t{} (+{})\n",
                group.prefix,
                group.group_name,
                group.servers.len()
            ));
            continue;
        }
        out.push_str(&format!(" [{}]\t{}\n", group.prefix, group.group_name));
        for (i, host) in group.servers.iter().enumerate() {
            let flag = format!("{}{}", group.prefix, i + 1);
            out.push_str("    ");
            out.push_str(&host.display_line(&flag, catalog.show_detail));
            out.push('\n');
        }
    }
    out
}

/// 交互菜单
pub struct Menu {
    catalog: Catalog,
    controller: SessionController,
    stdin: StdinPump,
}

impl Menu {
    pub fn new(catalog: Catalog, controller: SessionController, stdin: StdinPump) -> Self {
        Self {
            catalog,
            controller,
            stdin,
        }
    }

    /// 菜单主循环，initial 为启动参数中直接连接的 token
    pub async fn run(&mut self, initial: Option<String>) -> Result<()> {
        if let Some(token) = initial {
            self.connect(&token).await;
        }

        let mut stdout = io::stdout();
        loop {
            write!(stdout, "\n{}\n{}\n", render_listing(&self.catalog), HELP)?;
            let Some(line) = ask(&mut self.stdin, &mut stdout, "hostdeck").await? else {
                break;
            };
            match parse_command(&line, &self.catalog) {
                Command::Empty => {}
                Command::Quit => break,
                Command::Connect(token) => self.connect(&token).await,
                Command::ToggleGroup(prefix) => self.toggle_group(&prefix),
                Command::Add(prefix) => self.add(&prefix).await?,
                Command::Edit(token) => self.edit(&token).await?,
                Command::Remove(token) => self.remove(&token).await?,
                Command::Usage(usage) => println!("Usage: {usage}"),
                Command::Unknown(input) => println!("No host or group matches '{input}'"),
            }
        }
        Ok(())
    }

    async fn connect(&mut self, token: &str) {
        let Some(resolved) = self.catalog.resolve(token) else {
            println!("No host matches '{token}'");
            return;
        };
        let host = resolved.host.clone();
        let group = resolved.group.cloned();

        println!("Connecting to {} ({}@{})...", host.name, host.user, host.ip);
        match self.controller.run(&host, group.as_ref(), &mut self.stdin).await {
            Ok(summary) => {
                debug!(
                    "[Menu] Session {} finished after {:?}, exit status {:?}",
                    summary.session_id, summary.elapsed, summary.exit_status
                );
                println!("Connection to {} closed.", host.name);
            }
            Err(e) => {
                eprintln!("Connection to {} failed: {}", host.name, e);
                eprintln!("  {}", e.hint());
            }
        }
    }

    fn toggle_group(&mut self, prefix: &str) {
        if self.catalog.toggle_collapse(prefix).is_some() {
            self.persist(false);
        }
    }

    async fn add(&mut self, prefix: &str) -> Result<()> {
        let mut blank = HostRecord::default();
        blank.format();
        let Some(host) = self.prompt_fields(&blank).await? else {
            return Ok(());
        };
        if let Err(e) = host.validate(&self.catalog.next_host_path(prefix)) {
            println!("{e}");
            return Ok(());
        }
        let name = host.name.clone();
        self.catalog.add_host(prefix, host);
        self.persist(true);
        println!("Added {name}");
        Ok(())
    }

    async fn edit(&mut self, token: &str) -> Result<()> {
        let Some((current, path)) = self
            .catalog
            .resolve(token)
            .map(|r| (r.host.clone(), r.entry.path()))
        else {
            println!("No host matches '{token}'");
            return Ok(());
        };
        let Some(updated) = self.prompt_fields(&current).await? else {
            return Ok(());
        };
        if let Err(e) = updated.validate(&path) {
            println!("{e}");
            return Ok(());
        }
        if self.catalog.edit_host(token, |h| *h = updated) {
            self.persist(true);
        }
        Ok(())
    }

    async fn remove(&mut self, token: &str) -> Result<()> {
        let Some(name) = self.catalog.resolve(token).map(|r| r.host.name.clone()) else {
            println!("No host matches '{token}'");
            return Ok(());
        };
        let question = format!("Remove {name}?");
        if !confirm(&mut self.stdin, &mut io::stdout(), &question).await? {
            return Ok(());
        }
        if self.catalog.remove_host(token).is_some() {
            self.persist(true);
            println!("Removed {name}");
        }
        Ok(())
    }

    /// 逐字段输入；重试次数耗尽时提示并放弃本次操作
    async fn prompt_fields(&mut self, host: &HostRecord) -> Result<Option<HostRecord>> {
        match edit_host_fields(&mut self.stdin, &mut io::stdout(), host).await {
            Ok(result) => Ok(result),
            Err(PromptError::TooManyAttempts(field)) => {
                println!("Too many invalid values for {field}, cancelled");
                Ok(None)
            }
            Err(PromptError::Io(e)) => Err(e.into()),
        }
    }

    fn persist(&mut self, backup: bool) {
        if let Err(e) = save_catalog(&mut self.catalog, backup) {
            warn!("[Menu] Failed to save catalog: {}", e);
            eprintln!("Failed to save {}: {}", self.catalog.file().display(), e);
        }
    }
}
