//! Persona records for simulated actors.
//!
//! Personas are loaded once from JSON (a single object or an array of
//! objects) and are read-only afterwards.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Demographic and psychographic profile backing an actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Persona {
    /// Unique handle, also the actor's name in transcripts.
    pub username: String,
    #[serde(default)]
    pub age: u32,
    #[serde(default)]
    pub sex: String,
    #[serde(default)]
    pub sexual_orientation: String,
    #[serde(default)]
    pub demographic_group: String,
    #[serde(default)]
    pub current_employment: String,
    #[serde(default)]
    pub education_level: String,
    #[serde(default)]
    pub special_instructions: String,
    #[serde(default)]
    pub personality_characteristics: Vec<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PersonaFile {
    Many(Vec<Persona>),
    One(Box<Persona>),
}

impl Persona {
    /// Minimal persona with only a username.
    pub fn named(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            age: 0,
            sex: String::new(),
            sexual_orientation: String::new(),
            demographic_group: String::new(),
            current_employment: String::new(),
            education_level: String::new(),
            special_instructions: String::new(),
            personality_characteristics: Vec::new(),
        }
    }

    /// Load every persona in a JSON file.
    pub fn load_all(path: &Path) -> Result<Vec<Persona>, ConfigError> {
        let content = fs::read_to_string(path)?;
        let personas = match serde_json::from_str::<PersonaFile>(&content)? {
            PersonaFile::Many(list) => list,
            PersonaFile::One(one) => vec![*one],
        };

        for persona in &personas {
            if persona.username.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: "username".to_string(),
                    message: format!("empty username in {}", path.display()),
                });
            }
        }

        tracing::debug!(path = %path.display(), count = personas.len(), "Loaded personas");
        Ok(personas)
    }

    /// Prompt-friendly attributes, in a fixed order. Empty fields are skipped.
    pub fn to_attribute_list(&self) -> Vec<String> {
        let mut attributes = Vec::new();

        if self.age > 0 {
            attributes.push(format!("{} years old", self.age));
        }
        for field in [
            &self.sexual_orientation,
            &self.demographic_group,
            &self.current_employment,
        ] {
            if !field.trim().is_empty() {
                attributes.push(field.trim().to_string());
            }
        }
        attributes.extend(
            self.personality_characteristics
                .iter()
                .map(|c| c.trim())
                .filter(|c| !c.is_empty())
                .map(String::from),
        );
        if !self.sex.trim().is_empty() {
            attributes.push(sex_label(&self.sex).to_string());
        }
        if !self.education_level.trim().is_empty() {
            attributes.push(format!("with {} education", self.education_level.trim()));
        }

        attributes
    }
}

fn sex_label(sex: &str) -> &'static str {
    match sex.trim().to_lowercase().as_str() {
        "male" | "man" => "man",
        "female" | "woman" => "woman",
        _ => "non-binary",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample() -> Persona {
        Persona {
            username: "Emma35".to_string(),
            age: 38,
            sex: "female".to_string(),
            sexual_orientation: "heterosexual".to_string(),
            demographic_group: "Latino".to_string(),
            current_employment: "Registered Nurse".to_string(),
            education_level: "Bachelor's".to_string(),
            special_instructions: String::new(),
            personality_characteristics: vec![
                "compassionate".to_string(),
                "patient".to_string(),
            ],
        }
    }

    #[test]
    fn test_attribute_list_order() {
        assert_eq!(
            sample().to_attribute_list(),
            vec![
                "38 years old",
                "heterosexual",
                "Latino",
                "Registered Nurse",
                "compassionate",
                "patient",
                "woman",
                "with Bachelor's education",
            ]
        );
    }

    #[test]
    fn test_attribute_list_skips_empty_fields() {
        let mut persona = Persona::named("quiet");
        persona.sex = "Other".to_string();
        assert_eq!(persona.to_attribute_list(), vec!["non-binary"]);
        assert!(Persona::named("blank").to_attribute_list().is_empty());
    }

    #[test]
    fn test_load_single_and_array() {
        let dir = tempfile::tempdir().expect("tempdir");

        let single = dir.path().join("one.json");
        let mut file = fs::File::create(&single).expect("create");
        write!(file, r#"{{"username": "Giannis", "age": 45, "unknown_field": 1}}"#)
            .expect("write");
        let loaded = Persona::load_all(&single).expect("load single");
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].username, "Giannis");
        assert_eq!(loaded[0].age, 45);

        let many = dir.path().join("many.json");
        let json = serde_json::to_string(&vec![sample(), Persona::named("Bob")]).expect("json");
        fs::write(&many, json).expect("write");
        let loaded = Persona::load_all(&many).expect("load array");
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0], sample());
    }

    #[test]
    fn test_load_rejects_empty_username() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bad.json");
        fs::write(&path, r#"[{"username": "  "}]"#).expect("write");
        assert!(matches!(
            Persona::load_all(&path),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let result = Persona::load_all(Path::new("/nonexistent/personas.json"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
