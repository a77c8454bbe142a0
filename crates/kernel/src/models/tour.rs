//! Tour write payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

use super::{WriteInput, invalid, require_text, trim_in_place};

const NAME_MIN: usize = 4;
const NAME_MAX: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Difficult,
}

/// Body of a tour creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateTour {
    pub name: String,
    pub duration: f64,
    pub max_group_size: u32,
    pub difficulty: Difficulty,
    pub price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_discount: Option<f64>,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub image_cover: String,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub start_dates: Vec<DateTime<Utc>>,
    #[serde(default)]
    pub secret_tour: bool,
}

/// Body of a tour update; every field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UpdateTour {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_group_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<Difficulty>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_discount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_cover: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_dates: Option<Vec<DateTime<Utc>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_tour: Option<bool>,
}

/// Tour names are 4-20 letters, spaces allowed between words.
fn validate_name(name: &str) -> Result<(), ValidationError> {
    let len = name.chars().count();
    if !(NAME_MIN..=NAME_MAX).contains(&len) {
        return Err(invalid(format!(
            "a tour name must have between {NAME_MIN} and {NAME_MAX} characters"
        )));
    }
    if !name.chars().all(|c| c.is_alphabetic() || c == ' ') {
        return Err(invalid("a tour name must only contain letters"));
    }
    Ok(())
}

fn validate_positive(field: &str, value: f64) -> Result<(), ValidationError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(invalid(format!("'{field}' must be a positive number")));
    }
    Ok(())
}

fn validate_discount(discount: Option<f64>, price: Option<f64>) -> Result<(), ValidationError> {
    match (discount, price) {
        (Some(d), _) if !d.is_finite() || d < 0.0 => {
            Err(invalid("'priceDiscount' must not be negative"))
        }
        (Some(d), Some(p)) if d >= p => Err(invalid(format!(
            "discount price ({d}) should be below the regular price"
        ))),
        _ => Ok(()),
    }
}

impl WriteInput for CreateTour {
    fn normalize(&mut self) {
        trim_in_place(&mut self.name);
        trim_in_place(&mut self.summary);
        trim_in_place(&mut self.image_cover);
        if let Some(description) = self.description.as_mut() {
            trim_in_place(description);
        }
    }

    fn validate(&self) -> Result<(), ValidationError> {
        validate_name(&self.name)?;
        validate_positive("duration", self.duration)?;
        if self.max_group_size == 0 {
            return Err(invalid("'maxGroupSize' must be at least 1"));
        }
        validate_positive("price", self.price)?;
        validate_discount(self.price_discount, Some(self.price))?;
        require_text("summary", &self.summary)?;
        require_text("imageCover", &self.image_cover)
    }
}

impl WriteInput for UpdateTour {
    fn normalize(&mut self) {
        for field in [
            self.name.as_mut(),
            self.summary.as_mut(),
            self.image_cover.as_mut(),
            self.description.as_mut(),
        ]
        .into_iter()
        .flatten()
        {
            trim_in_place(field);
        }
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if let Some(name) = &self.name {
            validate_name(name)?;
        }
        if let Some(duration) = self.duration {
            validate_positive("duration", duration)?;
        }
        if self.max_group_size == Some(0) {
            return Err(invalid("'maxGroupSize' must be at least 1"));
        }
        if let Some(price) = self.price {
            validate_positive("price", price)?;
        }
        validate_discount(self.price_discount, self.price)?;
        if let Some(summary) = &self.summary {
            require_text("summary", summary)?;
        }
        if let Some(cover) = &self.image_cover {
            require_text("imageCover", cover)?;
        }
        Ok(())
    }
}
