use super::*;
use serial_test::serial;
use tempfile::TempDir;

fn test_config() -> (Config, TempDir) {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = Config::new(temp_dir.path());
    (config, temp_dir)
}

#[test]
fn default_config() {
    let (config, _temp_dir) = test_config();
    assert_eq!(config.provider, ProviderKind::Gemini);
    assert_eq!(config.gemini.embedding_model, "models/embedding-001");
    assert_eq!(config.gemini.generation_model, "models/gemini-2.5-flash");
    assert_eq!(config.ollama.protocol, "http");
    assert_eq!(config.ollama.host, "localhost");
    assert_eq!(config.ollama.port, 11434);
    assert_eq!(config.chunking.chunk_size, 1000);
    assert_eq!(config.chunking.chunk_overlap, 200);
    assert_eq!(config.ingest.documents_dir, PathBuf::from("docs"));
    assert_eq!(config.retrieval.default_chunks, 4);
}

#[test]
fn config_validation() {
    let (config, _temp_dir) = test_config();
    assert!(config.validate().is_ok());

    let mut invalid_config = config.clone();
    invalid_config.ollama.protocol = "ftp".to_string();
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.ollama.port = 0;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.gemini.embedding_model = String::new();
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.gemini.batch_size = 101;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.chunking.chunk_overlap = invalid_config.chunking.chunk_size;
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::OverlapTooLarge(1000, 1000))
    ));

    let mut invalid_config = config.clone();
    invalid_config.retrieval.default_chunks = 0;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config;
    invalid_config.ingest.documents_dir = PathBuf::new();
    assert!(invalid_config.validate().is_err());
}

#[test]
fn ollama_url_generation() {
    let (config, _temp_dir) = test_config();
    let url = config
        .ollama_url()
        .expect("should generate ollama_url successfully");
    assert_eq!(url.as_str(), "http://localhost:11434/");
}

#[test]
fn toml_serialization() {
    let (config, _temp_dir) = test_config();
    let toml_str = toml::to_string(&config).expect("should serialize toml correctly");
    let mut parsed_config: Config = toml::from_str(&toml_str).expect("should parse toml correctly");
    parsed_config.base_dir = config.base_dir.clone();
    assert_eq!(config, parsed_config);
}

#[test]
fn partial_toml_uses_defaults() {
    let partial = r#"
        provider = "ollama"

        [chunking]
        chunk_size = 500
    "#;

    let config: Config = toml::from_str(partial).expect("should parse partial toml");
    assert_eq!(config.provider, ProviderKind::Ollama);
    assert_eq!(config.chunking.chunk_size, 500);
    assert_eq!(config.chunking.chunk_overlap, 200);
    assert_eq!(config.ollama.model, "nomic-embed-text:latest");
    assert_eq!(config.embedding_model(), "nomic-embed-text:latest");
}

#[test]
fn api_key_is_not_serialized_when_absent() {
    let (config, _temp_dir) = test_config();
    let toml_str = toml::to_string(&config).expect("should serialize toml correctly");
    assert!(!toml_str.contains("api_key"));
}

#[test]
fn save_and_load_round_trip() {
    let (mut config, temp_dir) = test_config();
    config.provider = ProviderKind::Ollama;
    config
        .set_chunking(600, 60)
        .expect("chunking values are valid");

    config.save().expect("config should save");
    assert!(temp_dir.path().join("config.toml").exists());

    let loaded = Config::load(temp_dir.path()).expect("config should load");
    assert_eq!(loaded, config);
}

#[test]
fn load_missing_config() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = Config::load(temp_dir.path()).expect("missing config falls back to defaults");

    assert!(config.validate().is_ok());
    assert_eq!(config.get_base_dir(), temp_dir.path());
    assert_eq!(config.vector_database_path(), temp_dir.path().join("vectors"));
}

#[test]
fn load_rejects_invalid_values() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    fs::write(
        temp_dir.path().join("config.toml"),
        "[chunking]\nchunk_size = 100\nchunk_overlap = 150\n",
    )
    .expect("should write config");

    assert!(Config::load(temp_dir.path()).is_err());
}

#[test]
fn setter_validation() {
    let mut config = OllamaConfig::default();

    assert!(config.set_protocol("https".to_string()).is_ok());
    assert!(config.set_host("example.com".to_string()).is_ok());
    assert!(config.set_port(8080).is_ok());
    assert!(config.set_model("new-model".to_string()).is_ok());
    assert!(config.set_batch_size(128).is_ok());

    assert!(config.set_protocol("ftp".to_string()).is_err());
    assert!(config.set_protocol("HTTP".to_string()).is_err());
    assert!(config.set_port(0).is_err());
    assert!(config.set_model(String::new()).is_err());
    assert!(config.set_generation_model("   ".to_string()).is_err());
    assert!(config.set_batch_size(0).is_err());
    assert!(config.set_batch_size(1001).is_err());

    let mut gemini = GeminiConfig::default();
    assert!(gemini.set_batch_size(100).is_ok());
    assert!(gemini.set_batch_size(101).is_err());
    assert!(gemini.set_api_key("   ".to_string()).is_err());
    assert!(gemini.set_base_url("not a url".to_string()).is_err());
}

#[test]
fn chunking_setter_bounds() {
    let (mut config, _temp_dir) = test_config();

    assert!(config.set_chunking(1000, 0).is_ok());
    assert!(config.set_chunking(49, 0).is_err());
    assert!(config.set_chunking(8193, 0).is_err());
    assert!(config.set_chunking(300, 300).is_err());
    assert!(config.set_default_chunks(6).is_ok());
    assert!(config.set_default_chunks(101).is_err());
}

#[test]
#[serial]
fn api_key_prefers_config_file() {
    // SAFETY: serialized with the other tests that touch the process environment
    unsafe { std::env::set_var(API_KEY_ENV, "from-env") };

    let mut gemini = GeminiConfig::default();
    assert_eq!(gemini.resolve_api_key().as_deref(), Some("from-env"));

    gemini
        .set_api_key("from-file".to_string())
        .expect("key is valid");
    assert_eq!(gemini.resolve_api_key().as_deref(), Some("from-file"));

    // SAFETY: see above
    unsafe { std::env::remove_var(API_KEY_ENV) };
    assert_eq!(gemini.resolve_api_key().as_deref(), Some("from-file"));
}

#[test]
#[serial]
fn api_key_missing_everywhere() {
    // SAFETY: serialized with the other tests that touch the process environment
    unsafe { std::env::remove_var(API_KEY_ENV) };

    let gemini = GeminiConfig::default();
    assert_eq!(gemini.resolve_api_key(), None);
}

#[test]
#[serial]
fn data_dir_env_override() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    // SAFETY: serialized with the other tests that touch the process environment
    unsafe { std::env::set_var(DATA_DIR_ENV, temp_dir.path()) };

    let dir = Config::default_dir().expect("data dir resolves");
    assert_eq!(dir, temp_dir.path());

    // SAFETY: see above
    unsafe { std::env::remove_var(DATA_DIR_ENV) };
}

#[test]
fn error_display_messages() {
    let errors = vec![
        ConfigError::InvalidProtocol("ftp".to_string()),
        ConfigError::InvalidPort(0),
        ConfigError::InvalidBatchSize(0, 100),
        ConfigError::InvalidModel(String::new()),
        ConfigError::InvalidUrl("invalid-url".to_string()),
        ConfigError::OverlapTooLarge(300, 200),
    ];

    for error in errors {
        let message = format!("{error}");
        assert!(message.len() > 10);
    }
}
