use clap::{Parser, Subcommand, ValueEnum};

use crate::model::NodeRole;
use crate::replication::SyncDirection;

impl Cli {
    /// 解析命令行参数
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }
}

/// dualdb - 双数据库复制节点
#[derive(Parser, Debug, Default)]
#[command(name = "dualdb")]
#[command(version)]
#[command(about = "本地库 + 虚拟库双写、合并读取与定时同步", long_about = None)]
pub struct Cli {
    /// 配置文件路径
    #[arg(long, global = true, value_name = "FILE", help = "指定配置文件路径")]
    pub config_file: Option<String>,

    /// 本地库连接 URL
    #[arg(long, global = true, value_name = "URL", help = "本地数据库连接字符串")]
    pub local_db_url: Option<String>,

    /// 虚拟库连接 URL
    #[arg(long, global = true, value_name = "URL", help = "虚拟（团队）数据库连接字符串")]
    pub virtual_db_url: Option<String>,

    /// 以主节点运行
    #[arg(long, global = true, conflicts_with = "member", help = "主节点：双写 + 同步")]
    pub primary: bool,

    /// 以成员节点运行
    #[arg(long, global = true, help = "成员节点：只访问虚拟库")]
    pub member: bool,

    /// 同步间隔（毫秒）
    #[arg(long, global = true, value_name = "MS", help = "同步间隔（毫秒）")]
    pub sync_interval_ms: Option<u64>,

    /// 合并缓存 TTL（毫秒）
    #[arg(long, global = true, value_name = "MS", help = "合并读取缓存 TTL（毫秒）")]
    pub cache_ttl_ms: Option<u64>,

    /// 日志级别
    #[arg(
        long,
        global = true,
        value_name = "LEVEL",
        help = "日志级别: trace, debug, info, warn, error"
    )]
    pub log_level: Option<String>,

    /// 日志格式
    #[arg(long, global = true, value_name = "FORMAT", help = "日志格式: pretty, json, compact")]
    pub log_format: Option<String>,

    /// 日志文件路径
    #[arg(long, global = true, value_name = "PATH", help = "日志输出文件路径")]
    pub log_file: Option<String>,

    /// 详细输出（可重复使用：-v, -vv, -vvv）
    #[arg(short, global = true, action = clap::ArgAction::Count, help = "详细输出级别")]
    pub verbose: u8,

    /// 静默模式
    #[arg(long, short = 'q', global = true, help = "静默模式（只输出错误）")]
    pub quiet: bool,

    /// 开发模式（等同于 --log-level debug --log-format pretty）
    #[arg(long, global = true, help = "启用开发模式")]
    pub dev: bool,

    /// 子命令
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// 同步方向（命令行形式）
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DirectionArg {
    VirtualToLocal,
    LocalToVirtual,
}

impl From<DirectionArg> for SyncDirection {
    fn from(arg: DirectionArg) -> Self {
        match arg {
            DirectionArg::VirtualToLocal => SyncDirection::VirtualToLocal,
            DirectionArg::LocalToVirtual => SyncDirection::LocalToVirtual,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 启动节点（默认）：启动时同步一次，之后定时同步，Ctrl-C 退出
    Run,
    /// 手动执行一次同步
    Sync {
        /// 同步方向
        #[arg(long, value_enum, default_value = "virtual-to-local")]
        direction: DirectionArg,
    },
    /// 生成默认配置文件
    GenerateConfig {
        /// 输出文件路径
        #[arg(value_name = "PATH", default_value = "config.toml")]
        path: String,
    },
    /// 验证配置文件
    ValidateConfig {
        /// 配置文件路径
        #[arg(value_name = "PATH", default_value = "config.toml")]
        path: String,
    },
    /// 显示最终配置（合并后的配置）
    ShowConfig,
    /// 检查部署所需的环境变量
    CheckEnv,
}

impl Cli {
    /// 命令行指定的角色
    pub fn role(&self) -> Option<NodeRole> {
        if self.primary {
            Some(NodeRole::Primary)
        } else if self.member {
            Some(NodeRole::Member)
        } else {
            None
        }
    }

    /// 获取日志级别（考虑 verbose 和 quiet）
    pub fn get_log_level(&self) -> Option<String> {
        if self.quiet {
            return Some("error".to_string());
        }

        if self.dev {
            return Some("debug".to_string());
        }

        if let Some(level) = &self.log_level {
            return Some(level.clone());
        }

        match self.verbose {
            0 => None,
            1 => Some("info".to_string()),
            2 => Some("debug".to_string()),
            _ => Some("trace".to_string()),
        }
    }

    /// 获取日志格式
    pub fn get_log_format(&self) -> Option<String> {
        if self.dev {
            return Some("pretty".to_string());
        }
        self.log_format.clone()
    }
}
