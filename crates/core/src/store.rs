use crate::error::StoreError;
use crate::models::IndexEntry;

/// Checks a rebuild batch and returns the vector dimensionality it fixes.
pub fn validate_entries(entries: &[IndexEntry]) -> Result<usize, StoreError> {
    let Some(first) = entries.first() else {
        return Err(StoreError::Validation(
            "refusing to create an empty partition".to_string(),
        ));
    };

    let dimension = first.vector.len();
    if dimension == 0 {
        return Err(StoreError::Validation(
            "vectors must have at least one dimension".to_string(),
        ));
    }

    if let Some((position, entry)) = entries
        .iter()
        .enumerate()
        .find(|(_, entry)| entry.vector.len() != dimension)
    {
        return Err(StoreError::Validation(format!(
            "entry {} has dimension {} but the partition uses {}",
            position,
            entry.vector.len(),
            dimension
        )));
    }

    Ok(dimension)
}

/// Normalizes optional filters so an empty list means "no filter".
pub fn active_filters(context_filters: Option<&[String]>) -> Option<&[String]> {
    context_filters.filter(|filters| !filters.is_empty())
}

pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f32 {
    let dot: f32 = left.iter().zip(right.iter()).map(|(a, b)| a * b).sum();
    let norm_left = left.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_right = right.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_left == 0.0 || norm_right == 0.0 {
        return 0.0;
    }
    dot / (norm_left * norm_right)
}
