//! Review write payloads.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

use super::{WriteInput, invalid, require_text, trim_in_place};

const RATING_MIN: f64 = 1.0;
const RATING_MAX: f64 = 5.0;

fn validate_rating(rating: f64) -> Result<(), ValidationError> {
    if !(RATING_MIN..=RATING_MAX).contains(&rating) {
        return Err(invalid(format!(
            "'rating' must be between {RATING_MIN} and {RATING_MAX}"
        )));
    }
    Ok(())
}

/// Body of a review creation.
///
/// `tour` and `user` may be omitted when the route or the caller supplies
/// them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateReview {
    pub review: String,
    pub rating: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tour: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<Uuid>,
}

/// Body of a review update. Moving a review to another tour is allowed;
/// changing its author is not.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateReview {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tour: Option<Uuid>,
}

impl WriteInput for CreateReview {
    fn normalize(&mut self) {
        trim_in_place(&mut self.review);
    }

    fn validate(&self) -> Result<(), ValidationError> {
        require_text("review", &self.review)?;
        validate_rating(self.rating)
    }
}

impl WriteInput for UpdateReview {
    fn normalize(&mut self) {
        if let Some(review) = self.review.as_mut() {
            trim_in_place(review);
        }
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if let Some(review) = &self.review {
            require_text("review", review)?;
        }
        if let Some(rating) = self.rating {
            validate_rating(rating)?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rating_bounds() {
        assert!(CreateReview::from_body(json!({ "review": "ok", "rating": 5 })).is_ok());
        assert!(CreateReview::from_body(json!({ "review": "ok", "rating": 0 })).is_err());
        assert!(CreateReview::from_body(json!({ "review": "ok", "rating": 5.5 })).is_err());
        assert!(UpdateReview::from_body(json!({ "rating": 6 })).is_err());
    }

    #[test]
    fn references_are_uuids() {
        let tour = Uuid::now_v7();
        let map =
            CreateReview::from_body(json!({ "review": " great ", "rating": 4, "tour": tour }))
                .unwrap();
        assert_eq!(map["tour"], json!(tour.to_string()));
        assert_eq!(map["review"], json!("great"));
        assert!(!map.contains_key("user"));

        assert!(
            CreateReview::from_body(json!({ "review": "ok", "rating": 4, "tour": "nope" }))
                .is_err()
        );
    }

    #[test]
    fn authors_cannot_be_changed() {
        assert!(UpdateReview::from_body(json!({ "user": Uuid::now_v7() })).is_err());
    }

    #[test]
    fn blank_reviews_are_rejected() {
        assert!(CreateReview::from_body(json!({ "review": "   ", "rating": 3 })).is_err());
    }
}
