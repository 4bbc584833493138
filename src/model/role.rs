use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 节点角色（进程启动时确定，之后只读）
///
/// - `Primary`：双写 + 合并读取 + 同步
/// - `Member`：只访问虚拟库
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Primary,
    #[default]
    Member,
}

impl NodeRole {
    pub fn from_primary_flag(is_primary: bool) -> Self {
        if is_primary {
            NodeRole::Primary
        } else {
            NodeRole::Member
        }
    }

    /// 解析 `PRIMARY_LAPTOP` 环境变量：只有 `true` 表示主节点
    pub fn from_env_flag(value: &str) -> Self {
        Self::from_primary_flag(value == "true")
    }

    pub fn is_primary(&self) -> bool {
        matches!(self, NodeRole::Primary)
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRole::Primary => write!(f, "primary"),
            NodeRole::Member => write!(f, "member"),
        }
    }
}

impl FromStr for NodeRole {
    type Err = String;

    /// 配置文件和命令行使用：接受角色名和常见布尔写法
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "primary" | "true" | "1" | "yes" => Ok(NodeRole::Primary),
            "member" | "false" | "0" | "no" => Ok(NodeRole::Member),
            other => Err(format!("unknown node role: {}", other)),
        }
    }
}
