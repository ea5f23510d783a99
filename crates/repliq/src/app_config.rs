//! 🔧 Document loading — the sacred file-to-struct pipeline.
//!
//! 📡 "Config not found: We looked everywhere. Under the couch. Behind the fridge.
//! In the junk drawer. Nothing." — every developer at 3am 🦆
//!
//! 🏗️ Powered by Figment: `REPLIQ_*` environment variables first, then the file on top.
//! TOML or YAML, picked by extension, because half the team writes one and half the other,
//! and the peace treaty was signed in a `match`.

use std::path::Path;

use anyhow::{Context, bail};
use figment::{
    Figment,
    providers::{Env, Format, Toml, Yaml},
};
use tracing::info;

use crate::config::ConfigDocument;

/// 🔑 Every environment variable with this prefix is part of the document.
pub const ENV_PREFIX: &str = "REPLIQ_";

/// 🚀 Load and validate a document, from a file, from env vars, or from the sheer power of hoping.
///
/// 📐 Layering:
///   - `None` → `REPLIQ_*` env vars only. Nested keys split on `__`
///     (`REPLIQ_RATE_LIMIT__BURST=10`).
///   - `Some(path)` → env vars + the file, merged. The file wins on conflicts.
///
/// 💀 Fails when the file has an extension we don't read, when the merged document doesn't
/// deserialize, or when it deserializes but doesn't validate. The message says which.
pub fn load_config(config_file_name: Option<&Path>) -> anyhow::Result<ConfigDocument> {
    info!(
        "🔧 Loading configuration: {:#?}",
        config_file_name.unwrap_or(Path::new(""))
    );

    // 🏗️ env vars are the base layer, like a good sourdough starter
    let config = Figment::new().merge(Env::prefixed(ENV_PREFIX).split("__"));

    let config = match config_file_name {
        Some(file_name) => {
            let extension = file_name
                .extension()
                .and_then(|ext| ext.to_str())
                .map(str::to_ascii_lowercase);
            match extension.as_deref() {
                Some("toml") => config.merge(Toml::file(file_name)),
                Some("yaml" | "yml") => config.merge(Yaml::file(file_name)),
                _ => bail!(
                    "💀 '{}' is neither .toml nor .yaml/.yml. We read two languages and that isn't one of them.",
                    file_name.display()
                ),
            }
        }
        None => config,
    };

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables ({ENV_PREFIX}*). \
             The file exists in our hearts, but apparently not on disk, or not in this shape.",
            path.display()
        ),
        None => format!(
            "💀 Failed to parse configuration from environment variables ({ENV_PREFIX}*). \
             No file was provided, so this one's all on the environment. Classic."
        ),
    };

    let document: ConfigDocument = config.extract().context(context_msg)?;
    document
        .validate()
        .context("💀 The document parsed, but it doesn't hold up. Fix the field named above.")?;
    Ok(document)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;

    fn write_test_config(dir: &tempfile::TempDir, name: &str, contents: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        // 🧪 a real file, because Figment wants its documents from disk, like it's method acting
        fs::write(&path, contents)
            .expect("💀 Failed to write test config. The filesystem said 'new phone who dis'.");
        path
    }

    #[test]
    fn the_one_where_the_newspaper_archive_arrives_in_toml() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = write_test_config(
            &dir,
            "repliq.toml",
            r#"
            url = "https://chroniclingamerica.loc.gov"

            [rate_limit]
            burst = 1
            period = "1s"

            [[requests]]
            endpoint = "/search/titles/results"
            query = { terms = "oakland", format = "json", page = 5 }

            [[storage]]
            connection_string = "postgres://app:s3cret@db:5432/app"
            database = "histam"
            "#,
        );

        let document = load_config(Some(path.as_path()))
            .expect("💀 A perfectly reasonable TOML document should load.");

        assert_eq!(document.url, "https://chroniclingamerica.loc.gov");
        let rate_limit = document.rate_limit.expect("rate limit");
        assert_eq!(rate_limit.burst, 1);
        assert_eq!(rate_limit.period, Duration::from_secs(1));
        assert_eq!(document.requests[0].query.get("page").map(String::as_str), Some("5"));
        assert_eq!(document.requests[0].method, None);
        assert_eq!(document.storage[0].database, "histam");
    }

    #[test]
    fn the_one_where_the_javascript_people_wrote_yaml() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = write_test_config(
            &dir,
            "repliq.yaml",
            r#"
serviceURL: https://api.github.com
rateLimit:
  burst: 10
  period: 1m30s
authentication:
  bearer:
    token: ghp_notarealtoken
requests:
  - endpoint: /repos/golang/go/issues
    method: get
    table: go_issues
storageTargets:
  - connectionString: "sqlite::memory:"
    database: main
"#,
        );

        let document = load_config(Some(path.as_path())).expect("💀 camelCase YAML should load too");
        assert_eq!(document.url, "https://api.github.com");
        assert_eq!(
            document.rate_limit.map(|r| r.period),
            Some(Duration::from_secs(90))
        );
        assert_eq!(document.requests[0].table.as_deref(), Some("go_issues"));
        assert_eq!(document.storage[0].connection_string, "sqlite::memory:");
        assert_eq!(
            document.authentication.as_ref().map(|a| a.scheme_name()),
            Some("bearer")
        );
    }

    #[test]
    fn the_one_where_a_zero_burst_is_caught_at_the_door() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = write_test_config(
            &dir,
            "zero.toml",
            r#"
            url = "https://example.com"
            rate_limit = { burst = 0, period = 1 }

            [[requests]]
            endpoint = "/things"

            [[storage]]
            connection_string = "memory://x"
            database = "db"
            "#,
        );

        let err = load_config(Some(path.as_path())).expect_err("💀 a zero burst must not load");
        let chain = format!("{err:#}");
        assert!(chain.contains("rate_limit.burst"), "💀 got: {chain}");
    }

    #[test]
    fn the_one_where_a_negative_period_is_caught_at_the_door_too() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = write_test_config(
            &dir,
            "backwards.toml",
            r#"
            url = "https://example.com"
            rate_limit = { burst = 3, period = "-1s" }

            [[requests]]
            endpoint = "/things"

            [[storage]]
            connection_string = "memory://x"
            database = "db"
            "#,
        );

        let err = load_config(Some(path.as_path())).expect_err("💀 time does not run backwards here");
        let chain = format!("{err:#}");
        assert!(chain.contains("rate_limit.period"), "💀 got: {chain}");
    }

    #[test]
    fn the_one_where_json_is_politely_declined() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = write_test_config(&dir, "repliq.json", "{}");
        let err = load_config(Some(path.as_path())).expect_err("💀 .json is not a format we read");
        assert!(err.to_string().contains("neither .toml nor .yaml"));
    }
}
