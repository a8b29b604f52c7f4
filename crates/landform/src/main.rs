mod commands;
mod interrupt;
mod output;
mod project;

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use project::Project;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "landform")]
#[command(about = "Declare it. Plan it. Land it.", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

/// 全コマンド共通のオプション
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// 指定ディレクトリで実行
    #[arg(short = 'C', long = "chdir", global = true)]
    pub chdir: Option<PathBuf>,

    /// テンプレート変数の上書き (name=value)、複数指定可
    #[arg(long = "var", global = true, value_name = "NAME=VALUE")]
    pub vars: Vec<String>,

    /// 同時に実行するプロバイダー操作の上限
    #[arg(long, global = true)]
    pub parallelism: Option<usize>,

    /// ステートロックの待機秒数
    #[arg(long, global = true, value_name = "SECS")]
    pub lock_timeout: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// 宣言とリソースグラフを検証
    Validate,
    /// apply で行われる変更を表示
    Plan {
        /// 先にプロバイダーから現在の状態を読み直す
        #[arg(long)]
        refresh: bool,
        /// 管理中の全リソースの削除をプラン
        #[arg(long)]
        destroy: bool,
    },
    /// 宣言を適用
    Apply {
        /// 確認プロンプトを省略
        #[arg(short, long)]
        yes: bool,
        /// 先にプロバイダーから現在の状態を読み直す
        #[arg(long)]
        refresh: bool,
    },
    /// 管理中の全リソースを削除
    Destroy {
        /// 確認プロンプトを省略
        #[arg(short, long)]
        yes: bool,
    },
    /// ステートを参照
    State {
        #[command(subcommand)]
        command: StateCommands,
    },
    /// 異常終了で残ったロックを解放
    #[command(name = "force-unlock")]
    ForceUnlock {
        /// 解放するロックのトークン
        token: String,
    },
    /// バージョン情報を表示
    Version,
}

#[derive(Subcommand)]
enum StateCommands {
    /// ステート内のリソース一覧
    List,
    /// ステート内のリソースを表示
    Show {
        /// リソースアドレス (type.name)
        address: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    if matches!(cli.command, Commands::Version) {
        println!("landform {}", env!("CARGO_PKG_VERSION"));
        return;
    }

    if let Err(e) = run(cli).await {
        eprintln!();
        eprintln!("{} {:#}", "✗ Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let project = Project::open(&cli.global)?;

    let success = match cli.command {
        Commands::Validate => commands::validate::handle(&project)?,
        Commands::Plan { refresh, destroy } => {
            commands::plan::handle(&project, refresh, destroy).await?
        }
        Commands::Apply { yes, refresh } => commands::apply::handle(&project, yes, refresh).await?,
        Commands::Destroy { yes } => commands::destroy::handle(&project, yes).await?,
        Commands::State { command } => match command {
            StateCommands::List => commands::state::list(&project).await?,
            StateCommands::Show { address } => commands::state::show(&project, &address).await?,
        },
        Commands::ForceUnlock { token } => commands::force_unlock::handle(&project, &token).await?,
        Commands::Version => true,
    };

    if !success {
        std::process::exit(1);
    }
    Ok(())
}
