//! Language registry (§4.1): compile/run command templates and the
//! per-language time/memory bonus applied by the resource validator.

use std::collections::HashMap;
use std::sync::OnceLock;

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone)]
pub struct LanguageConfig {
    /// Name the source file must be written as inside the box (e.g. "main.cpp").
    pub source_file: String,
    pub compile_command: Option<Vec<String>>,
    pub run_command: Vec<String>,
    /// (multiplier, bonus_seconds): actual = base * multiplier + bonus_seconds * 1000.
    pub time_limit: Option<(u32, u32)>,
    /// (multiplier, bonus_mb): actual_kb = base_kb * multiplier + bonus_mb * 1024.
    pub memory_limit: Option<(u32, u32)>,
}

impl LanguageConfig {
    pub fn calculate_time_limit(&self, base_time_ms: u32) -> u32 {
        match self.time_limit {
            Some((multiplier, bonus_seconds)) => base_time_ms * multiplier + bonus_seconds * 1000,
            None => base_time_ms,
        }
    }

    pub fn calculate_memory_limit(&self, base_memory_kb: u32) -> u32 {
        match self.memory_limit {
            Some((multiplier, bonus_mb)) => base_memory_kb * multiplier + bonus_mb * 1024,
            None => base_memory_kb,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawLanguageConfig {
    source_file: String,
    compile_command: Option<String>,
    run_command: String,
    #[serde(default)]
    time_limit: Vec<String>,
    #[serde(default)]
    memory_limit: Vec<String>,
    #[serde(default)]
    aliases: Vec<String>,
}

static LANGUAGES: OnceLock<HashMap<String, LanguageConfig>> = OnceLock::new();

pub fn init_languages() -> anyhow::Result<()> {
    let content = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/files/languages.toml"));
    let languages = parse_languages(content)?;

    LANGUAGES
        .set(languages)
        .map_err(|_| anyhow::anyhow!("languages already initialized"))?;

    Ok(())
}

fn parse_languages(content: &str) -> anyhow::Result<HashMap<String, LanguageConfig>> {
    let raw_configs: HashMap<String, RawLanguageConfig> = toml::from_str(content)?;
    let mut languages = HashMap::new();

    for (name, raw) in raw_configs {
        let parse_limit =
            |raw_limit: &[String], kind: &str| -> anyhow::Result<Option<(u32, u32)>> {
                if raw_limit.is_empty() {
                    return Ok(None);
                }
                if raw_limit.len() != 2 {
                    anyhow::bail!("invalid {} limit for {}: {:?}", kind, name, raw_limit);
                }
                let multiplier = raw_limit[0]
                    .parse::<u32>()
                    .with_context(|| format!("invalid {} multiplier for {}", kind, name))?;
                let offset = raw_limit[1]
                    .parse::<u32>()
                    .with_context(|| format!("invalid {} offset for {}", kind, name))?;
                Ok(Some((multiplier, offset)))
            };

        let config = LanguageConfig {
            source_file: raw.source_file,
            compile_command: raw.compile_command.map(|cmd| into_command(&cmd)),
            run_command: into_command(&raw.run_command),
            time_limit: parse_limit(&raw.time_limit, "time")?,
            memory_limit: parse_limit(&raw.memory_limit, "memory")?,
        };

        languages.insert(name.to_lowercase(), config.clone());
        for alias in raw.aliases {
            languages.insert(alias.to_lowercase(), config.clone());
        }
    }

    Ok(languages)
}

pub fn get_language_config(language: &str) -> Option<LanguageConfig> {
    LANGUAGES.get()?.get(&language.to_lowercase()).cloned()
}

pub fn get_supported_languages() -> Vec<String> {
    LANGUAGES
        .get()
        .map(|langs| langs.keys().cloned().collect())
        .unwrap_or_default()
}

fn into_command(command: &str) -> Vec<String> {
    command.split_whitespace().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[cpp]
source_file = "main.cpp"
compile_command = "g++ -O2 -std=c++17 -o main main.cpp"
run_command = "./main"
time_limit = ["1", "0"]
memory_limit = ["1", "0"]

[python]
source_file = "main.py"
run_command = "python3 main.py"
aliases = ["py", "python3"]
time_limit = ["3", "2"]
memory_limit = ["2", "32"]
"#;

    #[test]
    fn parses_compile_and_run_commands() {
        let langs = parse_languages(SAMPLE).unwrap();
        let cpp = &langs["cpp"];
        assert_eq!(cpp.source_file, "main.cpp");
        assert!(cpp.compile_command.is_some());
        assert_eq!(cpp.run_command, vec!["./main"]);
    }

    #[test]
    fn aliases_resolve_to_same_config() {
        let langs = parse_languages(SAMPLE).unwrap();
        assert!(langs.contains_key("py"));
        assert!(langs.contains_key("python3"));
        assert_eq!(langs["py"].source_file, langs["python"].source_file);
    }

    #[test]
    fn interpreted_language_has_no_compile_command() {
        let langs = parse_languages(SAMPLE).unwrap();
        assert!(langs["python"].compile_command.is_none());
    }

    #[test]
    fn bonus_formula_matches_spec() {
        let langs = parse_languages(SAMPLE).unwrap();
        let python = &langs["python"];
        assert_eq!(python.calculate_time_limit(1000), 1000 * 3 + 2000);
        assert_eq!(python.calculate_memory_limit(1024), 1024 * 2 + 32 * 1024);
    }
}
