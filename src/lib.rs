//! # testpilot
//!
//! Natural-language browser testing. Describe the test in plain English, an
//! LLM drives the browser step by step, and you get a pass/fail report.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use testpilot::{CdpSurface, ClaudeReasoner, RunConfig, Session};
//!
//! # #[tokio::main]
//! # async fn main() -> testpilot::Result<()> {
//! let config = RunConfig::load("checkout.yaml")?;
//! let api_key = std::env::var("ANTHROPIC_API_KEY").expect("ANTHROPIC_API_KEY");
//!
//! let surface = CdpSurface::launch(&config.browser).await?;
//! let reasoner = ClaudeReasoner::new(config.llm.clone(), api_key);
//! let mut session = Session::new(
//!     Box::new(surface),
//!     Arc::new(reasoner),
//!     config.engine.to_options(),
//! );
//!
//! let report = session.run(&config.instruction).await;
//! println!("{}", report.summary);
//! session.close().await;
//! # Ok(())
//! # }
//! ```

mod config;

pub use config::{EngineSettings, ReportSettings, RunConfig};

// One-stop surface for runner code.
pub use testpilot_browser::{BrowserOptions, CdpSurface, Viewport};
pub use testpilot_engine::{
    ClaudeReasoner, EngineOptions, LlmConfig, Session, StepStatus, TestReport, TestStep,
};

/// Result type for testpilot operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while loading configs or wiring up a run.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("yaml parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("report error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("browser error: {0}")]
    Surface(#[from] testpilot_browser::SurfaceError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let yaml = r#"
name: "Checkout"
instruction: "Add the first product to the cart and check out as a guest"
"#;
        let config = RunConfig::parse(yaml).unwrap();
        assert_eq!(config.name, "Checkout");
        assert!(config.instruction.starts_with("Add the first product"));
        assert!(!config.browser.headless);
        assert_eq!(config.engine.max_retries, 3);
        assert_eq!(config.engine.max_cycles, 60);
        assert_eq!(config.engine.max_labels, 50);
        assert!(config.report.path.is_none());
    }

    #[test]
    fn test_parse_browser_config() {
        let yaml = r#"
name: "Test"
instruction: "Open the dashboard"
browser:
  headless: true
  proxy: "http://localhost:8080"
  user_agent: "Custom UA"
  viewport:
    width: 1920
    height: 1080
"#;
        let config = RunConfig::parse(yaml).unwrap();
        assert!(config.browser.headless);
        assert_eq!(config.browser.proxy, Some("http://localhost:8080".into()));
        assert_eq!(config.browser.user_agent, Some("Custom UA".into()));
        let viewport = config.browser.viewport.unwrap();
        assert_eq!(viewport.width, 1920);
        assert_eq!(viewport.height, 1080);
    }

    #[test]
    fn test_parse_llm_config() {
        let yaml = r#"
name: "Test"
instruction: "Open the dashboard"
llm:
  model: "claude-opus-4-20250514"
  max_tokens: 2048
"#;
        let config = RunConfig::parse(yaml).unwrap();
        assert_eq!(config.llm.model, "claude-opus-4-20250514");
        assert_eq!(config.llm.max_tokens, 2048);
        // Untouched fields keep their defaults.
        assert_eq!(config.llm.api_base, "https://api.anthropic.com/v1");
        assert_eq!(config.llm.request_timeout_secs, 120);
    }

    #[test]
    fn test_parse_engine_limits() {
        let yaml = r#"
name: "Test"
instruction: "Open the dashboard"
engine:
  max_retries: 5
  max_cycles: 10
"#;
        let config = RunConfig::parse(yaml).unwrap();
        assert_eq!(config.engine.max_retries, 5);
        assert_eq!(config.engine.max_cycles, 10);
        assert_eq!(config.engine.max_labels, 50);

        let options = config.engine.to_options();
        assert_eq!(options.max_retries, 5);
        assert_eq!(options.max_cycles, 10);
        assert_eq!(options.max_labels, 50);
    }

    #[test]
    fn test_parse_report_path() {
        let yaml = r#"
name: "Test"
instruction: "Open the dashboard"
report:
  path: "out/report.json"
"#;
        let config = RunConfig::parse(yaml).unwrap();
        assert_eq!(config.report.path.as_deref(), Some("out/report.json"));
    }

    #[test]
    fn test_validation_missing_name() {
        let yaml = r#"
instruction: "Open the dashboard"
"#;
        assert!(RunConfig::parse(yaml).is_err());
    }

    #[test]
    fn test_validation_empty_name() {
        let yaml = r#"
name: ""
instruction: "Open the dashboard"
"#;
        let err = RunConfig::parse(yaml).unwrap_err();
        assert!(err.to_string().contains("name"));
    }

    #[test]
    fn test_validation_empty_instruction() {
        let yaml = r#"
name: "Test"
instruction: "   "
"#;
        let err = RunConfig::parse(yaml).unwrap_err();
        assert!(err.to_string().contains("instruction"));
    }

    #[test]
    fn test_validation_zero_cycles() {
        let yaml = r#"
name: "Test"
instruction: "Open the dashboard"
engine:
  max_cycles: 0
"#;
        let err = RunConfig::parse(yaml).unwrap_err();
        assert!(err.to_string().contains("at least 1"));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let yaml = r#"
name: "Test"
instruction: "Open the dashboard"
timeout: 30
"#;
        assert!(RunConfig::parse(yaml).is_err());
    }

    #[test]
    fn test_from_instruction() {
        let config = RunConfig::from_instruction("Log in and open settings");
        assert_eq!(config.name, "Ad-hoc run");
        assert_eq!(config.instruction, "Log in and open settings");
        assert_eq!(config.engine.max_cycles, 60);
        assert!(config.report.path.is_none());
    }
}
