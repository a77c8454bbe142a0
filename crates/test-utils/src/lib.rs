//! Excursion test utilities.
//!
//! Fixture builders producing request bodies for tours, reviews and
//! accounts, plus JSON assertion helpers.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Value, json};
use uuid::Uuid;

/// Password used by every account fixture.
pub const TEST_PASSWORD: &str = "test-pass-1234";

/// Create a tour fixture with valid defaults.
pub fn test_tour(name: &str) -> TestTour {
    TestTour {
        name: name.to_string(),
        duration: 5.0,
        max_group_size: 10,
        difficulty: "easy".to_string(),
        price: 497.0,
        price_discount: None,
        summary: format!("{name} summary"),
        image_cover: "cover.jpg".to_string(),
        start_dates: Vec::new(),
        secret: false,
    }
}

/// A tour body builder.
#[derive(Debug, Clone)]
pub struct TestTour {
    pub name: String,
    pub duration: f64,
    pub max_group_size: u32,
    pub difficulty: String,
    pub price: f64,
    pub price_discount: Option<f64>,
    pub summary: String,
    pub image_cover: String,
    pub start_dates: Vec<DateTime<Utc>>,
    pub secret: bool,
}

impl TestTour {
    pub fn with_price(mut self, price: f64) -> Self {
        self.price = price;
        self
    }

    pub fn with_duration(mut self, days: f64) -> Self {
        self.duration = days;
        self
    }

    pub fn with_difficulty(mut self, difficulty: &str) -> Self {
        self.difficulty = difficulty.to_string();
        self
    }

    pub fn with_discount(mut self, discount: f64) -> Self {
        self.price_discount = Some(discount);
        self
    }

    /// Add a start date at 09:00 UTC.
    pub fn starting(mut self, year: i32, month: u32, day: u32) -> Self {
        if let chrono::LocalResult::Single(date) = Utc.with_ymd_and_hms(year, month, day, 9, 0, 0)
        {
            self.start_dates.push(date);
        }
        self
    }

    /// Hide the tour from ordinary reads.
    pub fn secret(mut self) -> Self {
        self.secret = true;
        self
    }

    /// Render as a creation request body.
    pub fn body(&self) -> Value {
        let mut body = json!({
            "name": self.name,
            "duration": self.duration,
            "maxGroupSize": self.max_group_size,
            "difficulty": self.difficulty,
            "price": self.price,
            "summary": self.summary,
            "imageCover": self.image_cover,
            "startDates": self.start_dates,
            "secretTour": self.secret,
        });
        if let Some(discount) = self.price_discount {
            body["priceDiscount"] = json!(discount);
        }
        body
    }
}

/// A review body for `tour` with the given rating.
pub fn review_body(tour: Uuid, rating: f64) -> Value {
    json!({
        "review": format!("Rated {rating}"),
        "rating": rating,
        "tour": tour,
    })
}

/// A signup body for `name` at `email`, using [`TEST_PASSWORD`].
pub fn signup_body(name: &str, email: &str) -> Value {
    json!({
        "name": name,
        "email": email,
        "password": TEST_PASSWORD,
        "passwordConfirm": TEST_PASSWORD,
    })
}

/// A unique email address for one test.
pub fn unique_email(prefix: &str) -> String {
    format!("{prefix}-{}@example.com", Uuid::now_v7().simple())
}

/// Assertion helpers for JSON content.
pub mod assert {
    use serde_json::Value;

    /// Assert that a JSON value has a specific key.
    pub fn has_key(value: &Value, key: &str) {
        assert!(
            value.get(key).is_some(),
            "expected JSON to have key '{key}', got: {value}"
        );
    }

    /// Assert that a JSON value lacks a specific key.
    pub fn lacks_key(value: &Value, key: &str) {
        assert!(
            value.get(key).is_none(),
            "expected JSON to lack key '{key}', got: {value}"
        );
    }

    /// Assert that a JSON number is within `1e-9` of `expected`.
    pub fn number_eq(value: &Value, expected: f64) {
        let actual = value.as_f64();
        assert!(
            actual.is_some_and(|a| (a - expected).abs() < 1e-9),
            "expected {expected}, got: {value}"
        );
    }
}
