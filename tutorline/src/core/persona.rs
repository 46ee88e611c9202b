//! Tutor persona composition.
//!
//! The assistant instructions are a pure function of the teaching style and
//! the language policy selected before the call, plus the learner's name.

use serde::{Deserialize, Serialize};

/// Strict teacher fragment.
pub const STRICT_FRAGMENT: &str = "Eres un maestro de inglés estricto. Enfócate en correcciones y gramática apropiada. Sé directo y exhaustivo.";

/// Friendly teacher fragment.
pub const FRIENDLY_FRAGMENT: &str = "Eres un maestro de inglés amigable. Sé alentador, paciente y haz que aprender sea divertido.";

/// Bilingual coach fragment.
pub const COACH_FRAGMENT: &str = "Eres un coach bilingüe. Sé flexible y adaptable, cambiando entre inglés y español según sea necesario.";

/// English-only language policy.
pub const ENGLISH_FRAGMENT: &str =
    "Habla solo en inglés a menos que el estudiante específicamente pida ayuda en español.";

/// Spanish-only language policy.
pub const SPANISH_FRAGMENT: &str =
    "Habla solo en español a menos que el estudiante específicamente pida ayuda en inglés.";

/// Mixed language policy.
pub const MIXED_FRAGMENT: &str = "Detecta qué idioma está usando el estudiante y responde en ese idioma. Alterna naturalmente entre inglés y español. Inicia la conversación en inglés para practicar, pero si el estudiante responde en español, ayuda en español y luego vuelve al inglés.";

/// Default learner name.
pub const DEFAULT_STUDENT_NAME: &str = "Eduardo";

/// Teaching style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TutorStyle {
    Strict,
    #[default]
    Friendly,
    Coach,
}

impl TutorStyle {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::Friendly => "friendly",
            Self::Coach => "coach",
        }
    }

    /// Parse from string, `None` when unknown.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "strict" => Some(Self::Strict),
            "friendly" => Some(Self::Friendly),
            "coach" => Some(Self::Coach),
            _ => None,
        }
    }

    fn fragment(&self) -> &'static str {
        match self {
            Self::Strict => STRICT_FRAGMENT,
            Self::Friendly => FRIENDLY_FRAGMENT,
            Self::Coach => COACH_FRAGMENT,
        }
    }
}

impl std::fmt::Display for TutorStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Language policy for the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TutorLanguage {
    #[default]
    English,
    Spanish,
    Mixed,
}

impl TutorLanguage {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::English => "english",
            Self::Spanish => "spanish",
            Self::Mixed => "mixed",
        }
    }

    /// Parse from string, `None` when unknown.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "english" | "en" => Some(Self::English),
            "spanish" | "es" => Some(Self::Spanish),
            "mixed" => Some(Self::Mixed),
            _ => None,
        }
    }

    fn fragment(&self) -> &'static str {
        match self {
            Self::English => ENGLISH_FRAGMENT,
            Self::Spanish => SPANISH_FRAGMENT,
            Self::Mixed => MIXED_FRAGMENT,
        }
    }
}

impl std::fmt::Display for TutorLanguage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Persona selection for one call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Persona {
    pub style: TutorStyle,
    pub language: TutorLanguage,
    pub student_name: String,
}

impl Default for Persona {
    fn default() -> Self {
        Self {
            style: TutorStyle::default(),
            language: TutorLanguage::default(),
            student_name: DEFAULT_STUDENT_NAME.to_string(),
        }
    }
}

impl Persona {
    pub fn new(style: TutorStyle, language: TutorLanguage) -> Self {
        Self {
            style,
            language,
            ..Default::default()
        }
    }

    /// Compose the assistant instruction text.
    pub fn instructions(&self) -> String {
        compose_instructions(self.style, self.language, &self.student_name)
    }
}

/// Build the instruction string sent in `session.update`.
pub fn compose_instructions(style: TutorStyle, language: TutorLanguage, student: &str) -> String {
    format!(
        "{style} Estás hablando con {student}, un mexicano que quiere mejorar su inglés. {language}\n\n\
         Habla con un tono natural y conversacional. Corrige la pronunciación suavemente y solo cuando sea útil.\n\
         Haz preguntas sobre su día, vida, hábitos y experiencias. Anímalo a hablar.\n\
         Mantén tus respuestas cortas y naturales, como una llamada telefónica real.\n\
         Cuando el usuario se conecte, salúdalo de inmediato sin esperar a que hable primero. \
         Di algo como \"Hey {student}, good to hear from you. How's your day going so far?\" o similar según el estilo y idioma.\n\
         Recuerda todo lo que {student} te cuenta durante esta llamada para mantener una conversación coherente y personalizada.",
        style = style.fragment(),
        language = language.fragment(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strict_english_fragments() {
        let text = compose_instructions(TutorStyle::Strict, TutorLanguage::English, "Eduardo");
        assert!(text.contains(STRICT_FRAGMENT));
        assert!(text.contains(ENGLISH_FRAGMENT));
        assert!(!text.contains(MIXED_FRAGMENT));
        assert!(!text.contains(SPANISH_FRAGMENT));
        assert!(!text.contains(FRIENDLY_FRAGMENT));
        assert!(!text.contains(COACH_FRAGMENT));
    }

    #[test]
    fn test_every_combination_is_distinct() {
        let styles = [TutorStyle::Strict, TutorStyle::Friendly, TutorStyle::Coach];
        let languages = [
            TutorLanguage::English,
            TutorLanguage::Spanish,
            TutorLanguage::Mixed,
        ];
        let mut seen = std::collections::HashSet::new();
        for style in styles {
            for language in languages {
                assert!(seen.insert(compose_instructions(style, language, "Ana")));
            }
        }
        assert_eq!(seen.len(), 9);
    }

    #[test]
    fn test_instructions_are_deterministic() {
        let persona = Persona::new(TutorStyle::Coach, TutorLanguage::Mixed);
        assert_eq!(persona.instructions(), persona.instructions());
        assert!(persona.instructions().contains("Eduardo"));
    }

    #[test]
    fn test_student_name_is_used() {
        let text = compose_instructions(TutorStyle::Friendly, TutorLanguage::Spanish, "Lucía");
        assert!(text.contains("Estás hablando con Lucía"));
        assert!(text.contains("Hey Lucía"));
        assert!(!text.contains("Eduardo"));
    }

    #[test]
    fn test_parse() {
        assert_eq!(TutorStyle::parse("STRICT"), Some(TutorStyle::Strict));
        assert_eq!(TutorStyle::parse("mentor"), None);
        assert_eq!(TutorLanguage::parse("es"), Some(TutorLanguage::Spanish));
        assert_eq!(TutorLanguage::parse(" mixed "), Some(TutorLanguage::Mixed));
        assert_eq!(TutorLanguage::parse("french"), None);
    }

    #[test]
    fn test_serde_lowercase() {
        let json = serde_json::to_string(&TutorStyle::Coach).unwrap();
        assert_eq!(json, "\"coach\"");
        let lang: TutorLanguage = serde_json::from_str("\"spanish\"").unwrap();
        assert_eq!(lang, TutorLanguage::Spanish);
    }
}
