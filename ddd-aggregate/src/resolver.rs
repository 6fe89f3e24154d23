//! 聚合流名解析
//!
//! 流名形如 `{token}-{aggregateId}`，其中 token 为聚合类型名的蛇形小写形式；
//! 同类聚合的全部事件可经类别流 `$ce-{token}` 订阅。
//!
use dashmap::DashMap;
use ddd_eventstore::client::CATEGORY_STREAM_PREFIX;

/// 可插拔的流名解析器
pub trait AggregateStreamResolver: Send + Sync {
    /// 聚合类型对应的类别 token
    fn category(&self, type_name: &'static str) -> String;

    fn stream_for(&self, type_name: &'static str, aggregate_id: &str) -> String {
        format!("{}-{}", self.category(type_name), aggregate_id)
    }

    /// 去掉首个 `-` 之前的类别段，还原聚合标识
    fn aggregate_id_for_stream(&self, stream: &str) -> String {
        stream
            .split_once('-')
            .map(|(_, id)| id)
            .unwrap_or(stream)
            .to_string()
    }

    fn category_stream(&self, type_name: &'static str) -> String {
        format!("{CATEGORY_STREAM_PREFIX}{}", self.category(type_name))
    }
}

/// 按类型名解析；转换结果按类型缓存
#[derive(Debug, Default)]
pub struct AggregateByTypeResolver {
    cache: DashMap<&'static str, String>,
}

impl AggregateByTypeResolver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AggregateStreamResolver for AggregateByTypeResolver {
    fn category(&self, type_name: &'static str) -> String {
        self.cache
            .entry(type_name)
            .or_insert_with(|| to_snake_case(type_name))
            .clone()
    }
}

/// `UserAccount` → `user_account`，`HTTPRequest` → `http_request`
pub fn to_snake_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            let prev = i.checked_sub(1).map(|p| chars[p]);
            let next = chars.get(i + 1);
            let boundary = match prev {
                Some(p) if p.is_lowercase() || p.is_ascii_digit() => true,
                Some(p) if p.is_uppercase() => next.is_some_and(|n| n.is_lowercase()),
                _ => false,
            };
            if boundary && !out.ends_with('_') {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}
