//! Canned joke lookup used to answer joke requests without calling the model.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JokeTopic {
    Programming,
    Animals,
    General,
}

impl JokeTopic {
    pub const ALL: [JokeTopic; 3] = [JokeTopic::Programming, JokeTopic::Animals, JokeTopic::General];

    pub fn as_str(self) -> &'static str {
        match self {
            JokeTopic::Programming => "programming",
            JokeTopic::Animals => "animals",
            JokeTopic::General => "general",
        }
    }

    /// Unknown topics fall back to `General`.
    pub fn normalize(topic: &str) -> Self {
        match topic.trim().to_lowercase().as_str() {
            "programming" => JokeTopic::Programming,
            "animals" => JokeTopic::Animals,
            _ => JokeTopic::General,
        }
    }

    fn jokes(self) -> &'static [&'static str] {
        match self {
            JokeTopic::Programming => &[
                "Why do programmers prefer dark mode? Because light attracts bugs!",
                "How many programmers does it take to change a light bulb? None, that's a hardware problem.",
                "A SQL query walks into a bar, walks up to two tables and asks: 'Can I join you?'",
                "There are only 10 types of people in the world: those who understand binary and those who don't.",
            ],
            JokeTopic::Animals => &[
                "Why don't elephants use computers? They're afraid of the mouse!",
                "Why don't oysters share? Because they're shellfish!",
                "What do you call a bear with no teeth? A gummy bear!",
            ],
            JokeTopic::General => &[
                "Why don't scientists trust atoms? Because they make up everything!",
                "What do you call fake spaghetti? An impasta!",
                "Why did the scarecrow win an award? He was outstanding in his field!",
            ],
        }
    }
}

impl fmt::Display for JokeTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps free-form input to a joke topic, if the user is asking for a joke.
pub fn detect_joke_request(message: &str) -> Option<JokeTopic> {
    let lower = message.to_lowercase();
    if lower.contains("programming joke") {
        Some(JokeTopic::Programming)
    } else if lower.contains("animal joke") {
        Some(JokeTopic::Animals)
    } else if lower.contains("joke") {
        Some(JokeTopic::General)
    } else {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JokeResult {
    pub topic: String,
    pub joke: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JokeError {
    Unavailable(String),
}

impl fmt::Display for JokeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JokeError::Unavailable(reason) => write!(f, "joke lookup unavailable: {reason}"),
        }
    }
}

impl std::error::Error for JokeError {}

#[async_trait]
pub trait JokeLookup: Send + Sync {
    async fn random_joke(&self, topic: &str) -> Result<JokeResult, JokeError>;
}

pub struct BuiltinJokes {
    min_delay: Duration,
    max_delay: Duration,
}

impl Default for BuiltinJokes {
    fn default() -> Self {
        Self::with_latency(Duration::from_millis(500), Duration::from_millis(2000))
    }
}

impl BuiltinJokes {
    pub fn with_latency(min_delay: Duration, max_delay: Duration) -> Self {
        Self {
            min_delay,
            max_delay: max_delay.max(min_delay),
        }
    }

    pub fn instant() -> Self {
        Self::with_latency(Duration::ZERO, Duration::ZERO)
    }

    pub fn topics() -> Vec<&'static str> {
        JokeTopic::ALL.iter().map(|topic| topic.as_str()).collect()
    }

    fn delay(&self) -> Result<Duration, JokeError> {
        let spread = self.max_delay.saturating_sub(self.min_delay).as_millis() as u64;
        if spread == 0 {
            return Ok(self.min_delay);
        }
        let offset = random_u64()? % (spread + 1);
        Ok(self.min_delay + Duration::from_millis(offset))
    }
}

#[async_trait]
impl JokeLookup for BuiltinJokes {
    async fn random_joke(&self, topic: &str) -> Result<JokeResult, JokeError> {
        let delay = self.delay()?;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let category = JokeTopic::normalize(topic);
        let jokes = category.jokes();
        let index = (random_u64()? % jokes.len() as u64) as usize;

        Ok(JokeResult {
            topic: category.as_str().to_string(),
            joke: jokes[index].to_string(),
        })
    }
}

fn random_u64() -> Result<u64, JokeError> {
    let mut bytes = [0u8; 8];
    getrandom::fill(&mut bytes).map_err(|e| JokeError::Unavailable(e.to_string()))?;
    Ok(u64::from_le_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detection_prefers_specific_topics() {
        assert_eq!(
            detect_joke_request("Tell me a programming joke"),
            Some(JokeTopic::Programming)
        );
        assert_eq!(
            detect_joke_request("tell me an ANIMAL JOKE please"),
            Some(JokeTopic::Animals)
        );
        assert_eq!(
            detect_joke_request("Tell me a general joke"),
            Some(JokeTopic::General)
        );
        assert_eq!(detect_joke_request("any jokes?"), Some(JokeTopic::General));
        assert_eq!(detect_joke_request("Explain quantum computing"), None);
    }

    #[test]
    fn unknown_topics_normalize_to_general() {
        assert_eq!(JokeTopic::normalize("  Programming "), JokeTopic::Programming);
        assert_eq!(JokeTopic::normalize("weather"), JokeTopic::General);
        assert_eq!(BuiltinJokes::topics(), vec!["programming", "animals", "general"]);
    }

    #[tokio::test]
    async fn lookup_returns_a_joke_from_the_requested_category() {
        let jokes = BuiltinJokes::instant();

        let result = jokes.random_joke("animals").await.unwrap();
        assert_eq!(result.topic, "animals");
        assert!(JokeTopic::Animals.jokes().contains(&result.joke.as_str()));

        let fallback = jokes.random_joke("cooking").await.unwrap();
        assert_eq!(fallback.topic, "general");
    }

    #[test]
    fn delay_stays_within_bounds() {
        let jokes = BuiltinJokes::with_latency(Duration::from_millis(5), Duration::from_millis(10));
        for _ in 0..20 {
            let delay = jokes.delay().unwrap();
            assert!(delay >= Duration::from_millis(5) && delay <= Duration::from_millis(10));
        }
    }
}
