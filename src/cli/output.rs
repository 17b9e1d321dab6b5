use anyhow::Result;
use clap::ValueEnum;
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Human,
    Json,
    Yaml,
}

impl OutputFormat {
    /// Render `value` for the terminal; `human` is used for the human format.
    pub fn render<T: Serialize>(self, value: &T, human: impl FnOnce() -> String) -> Result<String> {
        Ok(match self {
            OutputFormat::Human => human(),
            OutputFormat::Json => serde_json::to_string_pretty(value)?,
            OutputFormat::Yaml => serde_yaml::to_string(value)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn renders_each_format() {
        let value = json!({ "purged": 2 });
        assert_eq!(OutputFormat::Human.render(&value, || "2 purged".into()).unwrap(), "2 purged");
        assert!(OutputFormat::Json
            .render(&value, String::new)
            .unwrap()
            .contains("\"purged\": 2"));
        assert_eq!(OutputFormat::Yaml.render(&value, String::new).unwrap(), "purged: 2\n");
    }
}
