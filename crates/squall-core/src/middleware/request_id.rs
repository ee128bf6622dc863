//! Request id middleware
//!
//! Tags every request with an id, stores it in the context state bag for
//! downstream units, and mirrors it into a response header.

use super::{Middleware, Next};
use crate::{BoxFuture, Context};
use serde_json::Value;
use std::sync::Arc;

/// Request id configuration
#[derive(Clone)]
pub struct RequestIdConfig {
    /// Header name for the request id
    pub header_name: String,
    /// Generate an id if the client did not send one
    pub generate_id: bool,
    /// Log each tagged request at debug level
    pub log_requests: bool,
    /// Id generator
    pub id_generator: IdGenerator,
}

/// Id generator type
#[derive(Clone, Copy)]
pub enum IdGenerator {
    Uuid,
    NanoId,
    ShortId,
    Counter,
}

impl Default for RequestIdConfig {
    fn default() -> Self {
        Self {
            header_name: "X-Request-ID".to_string(),
            generate_id: true,
            log_requests: false,
            id_generator: IdGenerator::NanoId,
        }
    }
}

impl RequestIdConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header_name(mut self, name: impl Into<String>) -> Self {
        self.header_name = name.into();
        self
    }

    pub fn generate_id(mut self, generate: bool) -> Self {
        self.generate_id = generate;
        self
    }

    pub fn log_requests(mut self) -> Self {
        self.log_requests = true;
        self
    }

    pub fn id_generator(mut self, generator: IdGenerator) -> Self {
        self.id_generator = generator;
        self
    }
}

/// Key under which the id lands in the context state bag
pub const STATE_KEY: &str = "request_id";

/// Generate UUID v4
pub fn generate_uuid() -> String {
    let mut bytes = [0u8; 16];
    fill_random(&mut bytes);

    // Set version (4) and variant (RFC 4122)
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    format!(
        "{:08x}-{:04x}-{:04x}-{:04x}-{:012x}",
        u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        u16::from_be_bytes([bytes[4], bytes[5]]),
        u16::from_be_bytes([bytes[6], bytes[7]]),
        u16::from_be_bytes([bytes[8], bytes[9]]),
        u64::from_be_bytes([0, 0, bytes[10], bytes[11], bytes[12], bytes[13], bytes[14], bytes[15]])
    )
}

/// Generate NanoID (21 characters)
pub fn generate_nano_id() -> String {
    const ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz_-";
    let mut bytes = [0u8; 21];
    fill_random(&mut bytes);

    bytes.iter().map(|&b| ALPHABET[(b as usize) % ALPHABET.len()] as char).collect()
}

/// Generate short ID (8 characters)
pub fn generate_short_id() -> String {
    const ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
    let mut bytes = [0u8; 8];
    fill_random(&mut bytes);

    bytes.iter().map(|&b| ALPHABET[(b as usize) % ALPHABET.len()] as char).collect()
}

/// Simple counter-based ID
static COUNTER: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);

pub fn generate_counter_id() -> String {
    let count = COUNTER.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    format!("{:016x}", count)
}

/// Fill buffer with pseudo-random bytes
fn fill_random(buf: &mut [u8]) {
    use std::time::{SystemTime, UNIX_EPOCH};

    let mut seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0x9e3779b97f4a7c15);

    for byte in buf.iter_mut() {
        // Simple xorshift64
        seed ^= seed << 13;
        seed ^= seed >> 7;
        seed ^= seed << 17;
        *byte = (seed & 0xff) as u8;
    }
}

/// Request id middleware
pub struct RequestId {
    config: RequestIdConfig,
}

impl RequestId {
    pub fn new(config: RequestIdConfig) -> Self {
        Self { config }
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new(RequestIdConfig::default())
    }
}

impl Middleware for RequestId {
    fn call(&self, ctx: Arc<Context>, next: Next) -> BoxFuture {
        let config = self.config.clone();
        Box::pin(async move {
            let id = ctx
                .request()
                .header(&config.header_name)
                .map(|s| s.to_string())
                .or_else(|| {
                    config.generate_id.then(|| match config.id_generator {
                        IdGenerator::Uuid => generate_uuid(),
                        IdGenerator::NanoId => generate_nano_id(),
                        IdGenerator::ShortId => generate_short_id(),
                        IdGenerator::Counter => generate_counter_id(),
                    })
                });

            if let Some(id) = id {
                ctx.set_state(STATE_KEY, Value::String(id.clone()));
                ctx.header(&config.header_name, &id);

                if config.log_requests {
                    tracing::debug!(
                        request_id = %id,
                        method = %ctx.method(),
                        path = %ctx.path(),
                        "request received"
                    );
                }
            }

            next.run(ctx).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::{execute, handler_fn};
    use crate::request::{Method, Request, RequestBuilder};
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn test_uuid_format() {
        let uuid = generate_uuid();
        assert_eq!(uuid.len(), 36);
        assert_eq!(uuid.chars().filter(|&c| c == '-').count(), 4);
    }

    #[test]
    fn test_nano_id_length() {
        assert_eq!(generate_nano_id().len(), 21);
    }

    #[test]
    fn test_short_id_length() {
        assert_eq!(generate_short_id().len(), 8);
    }

    #[test]
    fn test_counter_monotonic() {
        let a = generate_counter_id();
        let b = generate_counter_id();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_id_generated_and_mirrored() {
        let ctx = Arc::new(Context::new(
            Request::new(Method::Get, "/tagged"),
            HashMap::new(),
        ));
        let chain: Arc<[Arc<dyn Middleware>]> =
            vec![Arc::new(RequestId::default()) as Arc<dyn Middleware>].into();
        let terminal = handler_fn(|ctx: Arc<Context>| async move {
            ctx.ok(&json!({}));
            Ok(())
        });

        execute(chain, terminal, ctx.clone()).await.unwrap();
        let id = ctx.get_state(STATE_KEY).unwrap();
        let res = ctx.take_response();
        assert_eq!(res.header("X-Request-ID"), id.as_str());
    }

    #[tokio::test]
    async fn test_client_id_preserved() {
        let request = RequestBuilder::new(Method::Get, "/tagged")
            .header("X-Request-ID", "client-supplied-42")
            .build();
        let ctx = Arc::new(Context::new(request, HashMap::new()));
        let chain: Arc<[Arc<dyn Middleware>]> =
            vec![Arc::new(RequestId::default()) as Arc<dyn Middleware>].into();
        let terminal = handler_fn(|ctx: Arc<Context>| async move {
            ctx.ok(&json!({}));
            Ok(())
        });

        execute(chain, terminal, ctx.clone()).await.unwrap();
        assert_eq!(
            ctx.get_state(STATE_KEY),
            Some(Value::String("client-supplied-42".into()))
        );
    }
}
