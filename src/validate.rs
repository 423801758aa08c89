//! Business-rule checks shared by the sync pipeline and batch preflight.

use crate::model::{Category, Condition, ProductDescriptor};

pub const MAX_PHOTOS: usize = 20;

/// Every rule is evaluated so callers see all problems at once.
/// An empty list means the descriptor is valid.
pub fn validate_descriptor(product: &ProductDescriptor) -> Vec<String> {
    let mut errors = Vec::new();

    let category = product.category.trim();
    if category.is_empty() {
        errors.push("Missing required field: category".to_string());
    } else if Category::parse_tag(category).is_none() {
        errors.push(format!("Invalid category: {}", category));
    }

    if product.name.trim().is_empty() {
        errors.push("Missing required field: name".to_string());
    }

    let condition = product.condition.trim();
    if condition.is_empty() {
        errors.push("Missing required field: condition".to_string());
    } else if Condition::parse_tag(condition).is_none() {
        errors.push(format!("Invalid condition: {}", condition));
    }

    match product.photos.len() {
        0 => errors.push("Missing required field: photos (at least 1 required)".to_string()),
        n if n > MAX_PHOTOS => {
            errors.push(format!("Too many photos: {} (max {})", n, MAX_PHOTOS))
        }
        _ => {}
    }

    errors
}
