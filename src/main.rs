//! Murmur - 终端里的流式 Agent 对话
//!
//! 入口：初始化日志与配置，打开当前目录为工作区，加载历史对话，然后进入逐行输入的主循环。

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};

use murmur::agent::ClaudeCliTransport;
use murmur::config::{load_config, AppConfig};
use murmur::conversation::{ConversationService, JsonFileStorage};
use murmur::core::{ShutdownManager, ShutdownReason};
use murmur::detector::{DetectionStatus, DetectorManager};
use murmur::transcript::{MessageId, Role, SystemClock, TranscriptView, TurnReducer};
use murmur::workspace::{Workspace, WorkspaceManager};
use murmur::{SendOutcome, TurnController};

const HELP: &str = "命令: /new 新建对话  /env 环境检测  /files 列出文件  /cat <路径> 查看文件  /quit 退出";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    murmur::observability::init();

    let cfg = match load_config(std::env::args().nth(1).map(PathBuf::from)) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!(error = %e, "failed to load config, using defaults");
            AppConfig::default()
        }
    };

    let data_dir = cfg.app.data_dir();
    tokio::fs::create_dir_all(&data_dir)
        .await
        .with_context(|| format!("Failed to create data dir {}", data_dir.display()))?;

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();

    let workspaces = Arc::new(WorkspaceManager::load(data_dir.join("workspaces.json")).await);
    let cwd = std::env::current_dir().context("Failed to read current dir")?;
    let workspace = workspaces.open(&cwd).await.context("Failed to open workspace")?;

    let storage = Arc::new(JsonFileStorage::new(data_dir.join("conversations")));
    let conversations = Arc::new(ConversationService::new(storage, workspaces.clone()));
    let transport = Arc::new(
        ClaudeCliTransport::new(conversations.clone(), &cfg.agent).with_cancel_token(shutdown.child_token()),
    );
    let reducer = TurnReducer::new(cfg.transcript.texts(), Arc::new(SystemClock), cfg.transcript.flush_interval());
    let mut controller = TurnController::with_reducer(transport, conversations.clone(), reducer);

    let workspace_path = workspace.path.display().to_string();
    controller.load_history(&workspace_path).await;

    let detector = DetectorManager::new(&cfg.detector, &cfg.agent, &data_dir);

    println!("工作区: {} ({})", workspace.name, workspace_path);
    println!("{}", HELP);
    let renderer = tokio::spawn(render(controller.view()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read stdin")?,
            _ = shutdown.wait_for_shutdown() => break,
        };
        let Some(line) = line else { break };
        let input = line.trim();

        match input {
            "" => continue,
            "/quit" | "/exit" => {
                shutdown.shutdown(ShutdownReason::UserInitiated);
                break;
            }
            "/help" => println!("{}", HELP),
            "/new" => match controller.create_conversation(&workspace.name, &workspace_path).await {
                Ok(conv) => println!("已创建对话 {}", conv.id),
                Err(e) => eprintln!("创建对话失败: {}", e),
            },
            "/env" => match detector.detect_all().await {
                Ok(info) => print_env(&info),
                Err(e) => eprintln!("环境检测失败: {}", e),
            },
            "/files" => print_files(&workspaces).await,
            _ if input.starts_with("/cat ") => {
                let path = input.trim_start_matches("/cat ").trim();
                match workspaces.files().await.and_then(|fs| fs.read_file(path)) {
                    Ok(content) => println!("{}", content),
                    Err(e) => eprintln!("读取失败: {}", e),
                }
            }
            _ => send(&mut controller, &workspace, &workspace_path, input).await,
        }
    }

    drop(controller);
    let _ = renderer.await;
    tracing::info!(reason = ?shutdown.reason(), "bye");
    Ok(())
}

/// 发送一轮；还没有对话时先以工作区名新建再重发
async fn send(controller: &mut TurnController, workspace: &Workspace, workspace_path: &str, input: &str) {
    match controller.send(input).await {
        Ok(SendOutcome::Sent) => {}
        Ok(SendOutcome::NeedsConversation) => {
            if let Err(e) = controller.create_conversation(&workspace.name, workspace_path).await {
                eprintln!("创建对话失败: {}", e);
                return;
            }
            if let Err(e) = controller.send(input).await {
                eprintln!("发送失败: {}", e);
            }
        }
        Err(e) => eprintln!("发送失败: {}", e),
    }
}

/// 订阅记录变更，增量打印 assistant 输出
async fn render(mut view: TranscriptView) {
    let mut printed: HashMap<MessageId, usize> = HashMap::new();
    let mut seen = view.latest();
    for msg in &seen {
        let prefix = match msg.role {
            Role::User => "> ",
            Role::Assistant => "",
        };
        println!("{}{}", prefix, msg.content);
        printed.insert(msg.id.clone(), msg.content.len());
    }

    while view.changed().await {
        seen = view.latest();
        let mut out = std::io::stdout().lock();
        for msg in &seen {
            let done = printed.get(&msg.id).copied();
            match (msg.role, done) {
                (Role::User, None) => {
                    printed.insert(msg.id.clone(), msg.content.len());
                }
                (Role::Assistant, None) if msg.id.is_thinking() => {
                    let _ = writeln!(out, "… {}", msg.content);
                    printed.insert(msg.id.clone(), msg.content.len());
                }
                (Role::Assistant, None) => {
                    let _ = write!(out, "\n{}", msg.content);
                    printed.insert(msg.id.clone(), msg.content.len());
                }
                (Role::Assistant, Some(n)) if msg.content.len() > n && !msg.id.is_thinking() => {
                    let _ = write!(out, "{}", &msg.content[n..]);
                    printed.insert(msg.id.clone(), msg.content.len());
                }
                _ => {}
            }
        }
        let _ = out.flush();
    }
    println!();
}

fn print_env(info: &murmur::detector::EnvironmentInfo) {
    println!(
        "环境状态: {:?}（必需项 {}/{}）",
        info.status, info.total_required_passed, info.total_required
    );
    for r in &info.results {
        let mark = if r.status == DetectionStatus::Success { "✓" } else { "✗" };
        println!("  {} {} {} {}", mark, r.name, r.version, r.message);
        if r.status != DetectionStatus::Success && !r.fix_command.is_empty() {
            println!("      修复: {}", r.fix_command);
        }
    }
}

async fn print_files(workspaces: &WorkspaceManager) {
    let listing = workspaces.files().await.and_then(|fs| fs.list_files());
    match listing {
        Ok(files) => {
            for f in files {
                println!("  {:?}\t{}\t{}", f.kind, f.size, f.path);
            }
        }
        Err(e) => eprintln!("列出文件失败: {}", e),
    }
}
