use super::*;

fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

#[test]
fn parses_backends_and_lowercases_names() {
    let cfg = BackendsConfig::from_vars(vars(&[
        ("CHATSPACE_BACKEND_OPENAI", "https://api.openai.com/v1/,sk-1,gpt-4o"),
        ("CHATSPACE_BACKEND_Local", "http://localhost:8080/v1,none,llama"),
        ("UNRELATED", "x"),
    ]));
    assert_eq!(cfg.backends.len(), 2);
    assert_eq!(cfg.backends[0].name, "local");
    assert_eq!(cfg.backends[1].name, "openai");
    assert_eq!(cfg.backends[1].base_url, "https://api.openai.com/v1");
    assert_eq!(cfg.backends[1].model, "gpt-4o");
    assert!(cfg.default_backend.is_none());
}

#[test]
fn skips_malformed_entries() {
    let cfg = BackendsConfig::from_vars(vars(&[
        ("CHATSPACE_BACKEND_BROKEN", "https://example.test/v1,key"),
        ("CHATSPACE_BACKEND_EMPTYKEY", "https://example.test/v1,,model"),
        ("CHATSPACE_BACKEND_", "https://example.test/v1,key,model"),
        ("CHATSPACE_BACKEND_OK", "https://example.test/v1,key,model"),
    ]));
    assert_eq!(cfg.backends.len(), 1);
    assert_eq!(cfg.backends[0].name, "ok");
}

#[test]
fn model_may_contain_commas() {
    let cfg = BackendsConfig::from_vars(vars(&[("CHATSPACE_BACKEND_X", "u,k,model,with,commas")]));
    assert_eq!(cfg.backends[0].model, "model,with,commas");
}

#[test]
fn reads_default_backend() {
    let cfg = BackendsConfig::from_vars(vars(&[("CHATSPACE_DEFAULT_BACKEND", " OpenAI ")]));
    assert_eq!(cfg.default_backend.as_deref(), Some("openai"));

    let cfg = BackendsConfig::from_vars(vars(&[("CHATSPACE_DEFAULT_BACKEND", "")]));
    assert!(cfg.default_backend.is_none());
}

#[test]
fn default_timeouts() {
    let cfg = BackendsConfig::from_vars(Vec::new());
    assert_eq!(
        cfg.timeouts,
        LlmTimeouts { request_secs: DEFAULT_LLM_REQUEST_TIMEOUT_SECS, connect_secs: DEFAULT_LLM_CONNECT_TIMEOUT_SECS }
    );
}
