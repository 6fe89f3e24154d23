//! 事件序列化器（Serializer）
//!
//! - 负载：事件本身的 JSON；
//! - 元数据文档：协议版本、事件简单名、完全限定类型令牌、声明模块等内部头，
//!   以及调用方元数据（若提供）。调用方给出空表时写入哨兵头，以区别于“未提供”。
//!
//! 解码时先读元数据文档：缺少协议版本头的记录被归类为外来记录（不是错误）。
//! 类型解析结果按令牌缓存，进程内有效。
//!
use crate::client::{EventData, RecordedEvent};
use crate::error::{EventStoreError, EventStoreResult};
use crate::event::{EventDescriptor, EventTypes, Metadata, ReadEnvelope, WriteEnvelope};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;

/// 内部头前缀；带此前缀的键不会出现在调用方元数据中
pub const HEADER_PREFIX: &str = "ddd-eventstore.";
pub const VERSION_HEADER: &str = "ddd-eventstore.version";
pub const EVENT_TYPE_HEADER: &str = "ddd-eventstore.event.type";
pub const TYPE_TOKEN_HEADER: &str = "ddd-eventstore.event.token";
pub const MODULE_HEADER: &str = "ddd-eventstore.event.module";
pub const EMPTY_METADATA_HEADER: &str = "ddd-eventstore.empty-metadata";

const PROTOCOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// 解码结果
#[derive(Debug)]
pub enum Decoded {
    Event(ReadEnvelope),
    /// 非本库产生的记录
    Foreign,
}

pub struct Serializer {
    types: Arc<EventTypes>,
    cache: DashMap<String, EventDescriptor>,
}

impl Serializer {
    pub fn new(types: Arc<EventTypes>) -> Self {
        Self {
            types,
            cache: DashMap::new(),
        }
    }

    pub fn serialize(&self, envelope: &WriteEnvelope) -> EventStoreResult<EventData> {
        let event = envelope.event();
        let info = event.event_type();

        let mut headers: HashMap<String, String> = HashMap::new();
        match envelope.metadata() {
            Some(metadata) if metadata.is_empty() => {
                headers.insert(EMPTY_METADATA_HEADER.into(), "true".into());
            }
            Some(metadata) => {
                headers.extend(metadata.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            None => {}
        }
        headers.insert(VERSION_HEADER.into(), PROTOCOL_VERSION.into());
        headers.insert(EVENT_TYPE_HEADER.into(), info.name().into());
        headers.insert(TYPE_TOKEN_HEADER.into(), info.type_token().into());
        headers.insert(MODULE_HEADER.into(), info.module().into());

        Ok(EventData {
            event_id: event.event_id(),
            event_type: info.name().to_string(),
            data: event.to_payload()?,
            metadata: serde_json::to_vec(&headers)?,
        })
    }

    pub fn deserialize(&self, record: &RecordedEvent) -> EventStoreResult<Decoded> {
        let Ok(mut headers) = serde_json::from_slice::<HashMap<String, String>>(&record.metadata)
        else {
            return Ok(Decoded::Foreign);
        };
        if !headers.contains_key(VERSION_HEADER) {
            return Ok(Decoded::Foreign);
        }

        let type_token = header(&headers, TYPE_TOKEN_HEADER);
        let descriptor = self
            .resolve(
                type_token,
                header(&headers, MODULE_HEADER),
                header(&headers, EVENT_TYPE_HEADER),
            )
            .ok_or_else(|| EventStoreError::UnknownEventType {
                stream: record.stream_id.clone(),
                event_id: record.event_id,
                type_token: type_token.to_string(),
            })?;
        let event = descriptor.decode(&record.data)?;

        let empty_marker = headers.contains_key(EMPTY_METADATA_HEADER);
        headers.retain(|key, _| !key.starts_with(HEADER_PREFIX));
        let metadata = if headers.is_empty() {
            empty_marker.then(Metadata::new)
        } else {
            Some(headers)
        };

        Ok(Decoded::Event(ReadEnvelope::new(
            event,
            metadata,
            record.stream_id.clone(),
            record.revision,
        )))
    }

    fn resolve(&self, type_token: &str, module: &str, name: &str) -> Option<EventDescriptor> {
        if let Some(found) = self.cache.get(type_token) {
            return Some(*found);
        }
        let descriptor = self.types.resolve(type_token, module, name)?;
        self.cache.insert(type_token.to_string(), descriptor);
        Some(descriptor)
    }
}

fn header<'a>(headers: &'a HashMap<String, String>, key: &str) -> &'a str {
    headers.get(key).map(String::as_str).unwrap_or_default()
}
