use serde::{Deserialize, Serialize};

use crate::error::{ReplicaError, Result};

// ============================================================================
// 实体类型 → 主键字段
// ============================================================================

/// 默认实体表：实体类型名 → 主键字段名
///
/// 顺序即同步顺序。合并读取和同步共用同一张表。
pub const DEFAULT_ENTITY_KEYS: &[(&str, &str)] = &[
    ("users", "user_id"),
    ("assets", "asset_id"),
    ("categories", "category_id"),
    ("suppliers", "supplier_id"),
    ("maintenance_staff", "m_staff_id"),
    ("locations", "location_id"),
    ("buyers", "buyer_id"),
    ("assignments", "assignment_id"),
    ("maintenance", "maintenance_id"),
    ("disposals", "disposal_id"),
    ("asset_valuation", "valuation_id"),
];

/// 单个实体定义
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDef {
    /// 实体类型名（同时是表名）
    pub name: String,
    /// 主键字段名
    pub key_field: String,
}

/// 实体注册表
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRegistry {
    entities: Vec<EntityDef>,
}

impl Default for EntityRegistry {
    fn default() -> Self {
        Self {
            entities: DEFAULT_ENTITY_KEYS
                .iter()
                .map(|(name, key)| EntityDef {
                    name: name.to_string(),
                    key_field: key.to_string(),
                })
                .collect(),
        }
    }
}

impl EntityRegistry {
    /// 创建空注册表
    pub fn empty() -> Self {
        Self {
            entities: Vec::new(),
        }
    }

    /// 注册（或覆盖）一个实体类型
    pub fn register(mut self, name: &str, key_field: &str) -> Result<Self> {
        validate_identifier(name)?;
        validate_identifier(key_field)?;

        match self.entities.iter_mut().find(|e| e.name == name) {
            Some(existing) => existing.key_field = key_field.to_string(),
            None => self.entities.push(EntityDef {
                name: name.to_string(),
                key_field: key_field.to_string(),
            }),
        }
        Ok(self)
    }

    /// 查找实体类型的主键字段
    pub fn key_field(&self, entity: &str) -> Option<&str> {
        self.entities
            .iter()
            .find(|e| e.name == entity)
            .map(|e| e.key_field.as_str())
    }

    /// 查找主键字段，未注册时返回错误
    pub fn require_key_field(&self, entity: &str) -> Result<&str> {
        self.key_field(entity)
            .ok_or_else(|| ReplicaError::UnknownEntity(entity.to_string()))
    }

    /// 按注册顺序遍历实体
    pub fn entities(&self) -> impl Iterator<Item = &EntityDef> {
        self.entities.iter()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

/// 校验 SQL 标识符：`[A-Za-z_][A-Za-z0-9_]*`
pub fn validate_identifier(ident: &str) -> Result<()> {
    let mut chars = ident.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };

    if valid {
        Ok(())
    } else {
        Err(ReplicaError::Validation(format!(
            "invalid identifier: {:?}",
            ident
        )))
    }
}
