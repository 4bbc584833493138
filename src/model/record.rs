use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// 通用记录（一行数据，JSON 对象）
pub type Record = Map<String, Value>;

/// 匹配条件（字段 = 值，全部满足）
pub type MatchCriteria = Map<String, Value>;

/// 排序方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// 排序字段
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    #[serde(default)]
    pub order: SortOrder,
}

/// 列表查询选项
///
/// 序列化后的 JSON 同时作为合并缓存键的一部分。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryOptions {
    /// 等值过滤
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub filter: Record,
    /// 排序
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub order_by: Vec<OrderBy>,
    /// 最多返回条数
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub take: Option<u64>,
    /// 跳过条数
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip: Option<u64>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加等值过滤条件
    pub fn filter_eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filter.insert(field.to_string(), value.into());
        self
    }

    /// 添加排序字段
    pub fn order_by(mut self, field: &str, order: SortOrder) -> Self {
        self.order_by.push(OrderBy {
            field: field.to_string(),
            order,
        });
        self
    }

    pub fn take(mut self, take: u64) -> Self {
        self.take = Some(take);
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    /// 稳定的序列化形式（缓存键）
    pub fn cache_fragment(&self) -> String {
        // serde_json 的 Map 默认按键排序，结果是确定的
        serde_json::to_string(self).unwrap_or_default()
    }

    /// 判断记录是否满足过滤条件
    pub fn matches(&self, record: &Record) -> bool {
        matches_criteria(record, &self.filter)
    }

    /// 在内存中应用排序与分页
    pub fn apply(&self, mut rows: Vec<Record>) -> Vec<Record> {
        if !self.order_by.is_empty() {
            rows.sort_by(|a, b| {
                for order in &self.order_by {
                    let ord = compare_values(a.get(&order.field), b.get(&order.field));
                    let ord = match order.order {
                        SortOrder::Asc => ord,
                        SortOrder::Desc => ord.reverse(),
                    };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
        }

        let skip = self.skip.unwrap_or(0) as usize;
        let take = self.take.map(|t| t as usize).unwrap_or(usize::MAX);
        rows.into_iter().skip(skip).take(take).collect()
    }
}

/// 判断记录是否满足所有等值条件
pub fn matches_criteria(record: &Record, criteria: &MatchCriteria) -> bool {
    criteria
        .iter()
        .all(|(field, expected)| record.get(field).map_or(expected.is_null(), |v| v == expected))
}

/// 记录主键值的规范化字符串（用于去重）
pub fn key_of(record: &Record, key_field: &str) -> Option<String> {
    match record.get(key_field)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// 构造以主键为条件的匹配
pub fn key_criteria(key_field: &str, value: Value) -> MatchCriteria {
    let mut criteria = Map::new();
    criteria.insert(key_field.to_string(), value);
    criteria
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}

/// 双写操作结果
///
/// `success == true` 时 `local_result` / `virtual_result` 至少一个非空。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationResult {
    pub success: bool,
    pub local_result: Option<Value>,
    pub virtual_result: Option<Value>,
    pub error: Option<String>,
}

impl OperationResult {
    /// 构造成功结果
    pub fn succeeded(local_result: Option<Value>, virtual_result: Option<Value>) -> Self {
        Self {
            success: true,
            local_result,
            virtual_result,
            error: None,
        }
    }

    /// 构造失败结果
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            local_result: None,
            virtual_result: None,
            error: Some(error.into()),
        }
    }
}
