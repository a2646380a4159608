use chrono::Utc;
use rand::seq::SliceRandom;

use super::types::MessageSource;

const TEMPLATES: &[&str] = &[
    "Hello! This is a test message from our SMS service.",
    "Greetings! Hope you're having a great day!",
    "This is an automated message to test our SMS functionality.",
    "Hi there! Just checking if our SMS service is working properly.",
    "Test message #{count} - SMS delivery verification in progress.",
    "Hello! This is message number #{count} from our testing system.",
    "Automated SMS test - Message #{count} of #{total}.",
    "SMS Service Test: Message #{count} successfully queued for delivery.",
    "Testing SMS functionality - This is message #{count}.",
    "Hello! SMS test message #{count} sent at {timestamp}.",
];

/// Builds the body for message `index` (1-based) of `total`.
pub fn compose(source: &MessageSource, index: u32, total: u32) -> String {
    match source {
        MessageSource::RandomTemplate => compose_random(index, total),
        MessageSource::Custom(content) => compose_custom(content, index),
    }
}

pub fn compose_random(index: u32, total: u32) -> String {
    let template = TEMPLATES
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(TEMPLATES[0]);
    fill(template, index, total)
}

pub fn compose_custom(content: &str, index: u32) -> String {
    format!("{} (Message #{})", content, index)
}

fn fill(template: &str, index: u32, total: u32) -> String {
    let mut body = template
        .replace("#{count}", &index.to_string())
        .replace("#{total}", &total.to_string());
    if body.contains("{timestamp}") {
        let now = Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string();
        body = body.replace("{timestamp}", &now);
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_placeholders() {
        assert_eq!(
            fill("Automated SMS test - Message #{count} of #{total}.", 3, 7),
            "Automated SMS test - Message 3 of 7."
        );
        let stamped = fill("sent at {timestamp}.", 1, 1);
        assert!(!stamped.contains("{timestamp}"));
        assert!(stamped.ends_with("UTC."));
    }

    #[test]
    fn test_every_template_fills_completely() {
        for template in TEMPLATES {
            let body = fill(template, 4, 9);
            assert!(!body.is_empty());
            assert!(!body.contains("#{"));
            assert!(!body.contains("{timestamp}"));
        }
    }

    #[test]
    fn test_random_body_is_nonempty() {
        for i in 1..=20 {
            assert!(!compose_random(i, 20).is_empty());
        }
    }

    #[test]
    fn test_custom_body() {
        let body = compose(&MessageSource::Custom("Reminder".to_string()), 2, 5);
        assert_eq!(body, "Reminder (Message #2)");
    }

    #[test]
    fn test_longest_custom_body_fits() {
        use crate::dispatch::types::{MAX_BODY_LEN, MAX_CUSTOM_MESSAGE_LEN, MAX_MESSAGE_COUNT};

        let content = "x".repeat(MAX_CUSTOM_MESSAGE_LEN);
        let body = compose(&MessageSource::Custom(content), MAX_MESSAGE_COUNT, MAX_MESSAGE_COUNT);
        assert_eq!(body.chars().count(), MAX_BODY_LEN);
    }
}
