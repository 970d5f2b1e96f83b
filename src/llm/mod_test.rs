use super::*;
use crate::llm::types::TokenStream;
use futures::StreamExt;

struct Silent;

#[async_trait::async_trait]
impl ChatBackend for Silent {
    async fn stream_chat(&self, _messages: &[ChatMessage]) -> Result<TokenStream, LlmError> {
        Ok(futures::stream::empty().boxed())
    }
}

fn registry() -> BackendRegistry {
    BackendRegistry::empty()
        .with_backend("alpha", Arc::new(Silent))
        .with_backend("beta", Arc::new(Silent))
        .with_backend("gamma", Arc::new(Silent))
}

#[test]
fn list_available_promotes_default() {
    let reg = registry().with_default("gamma");
    assert_eq!(reg.list_available(), vec!["gamma", "alpha", "beta"]);
}

#[test]
fn list_available_without_default_is_sorted() {
    assert_eq!(registry().list_available(), vec!["alpha", "beta", "gamma"]);
}

#[test]
fn unknown_default_is_not_listed() {
    let reg = registry().with_default("missing");
    assert_eq!(reg.list_available().len(), 3);
    assert!(reg.resolve(None).is_none());
}

#[test]
fn resolve_prefers_explicit_backend() {
    let reg = registry().with_default("alpha");
    assert_eq!(reg.resolve(Some("beta")).map(|(n, _)| n).as_deref(), Some("beta"));
    assert_eq!(reg.resolve(None).map(|(n, _)| n).as_deref(), Some("alpha"));
    assert!(reg.resolve(Some("nope")).is_none());
}

#[test]
fn empty_registry_resolves_nothing() {
    let reg = BackendRegistry::empty();
    assert!(reg.list_available().is_empty());
    assert!(!reg.is_available("alpha"));
    assert!(reg.resolve(None).is_none());
}

#[test]
fn from_config_registers_every_backend() {
    let cfg = BackendsConfig::from_vars(vec![
        ("CHATSPACE_BACKEND_ONE".to_string(), "https://one.test/v1,k,m".to_string()),
        ("CHATSPACE_BACKEND_TWO".to_string(), "https://two.test/v1,k,m".to_string()),
        ("CHATSPACE_DEFAULT_BACKEND".to_string(), "two".to_string()),
    ]);
    let reg = BackendRegistry::from_config(&cfg).unwrap();
    assert_eq!(reg.list_available(), vec!["two", "one"]);
    assert_eq!(reg.default_backend(), Some("two"));
}
