use crate::error::{RecError, RecResult};

pub fn validate_rating_value(value: f64) -> RecResult<()> {
    if !value.is_finite() {
        return Err(RecError::InvalidInput(format!(
            "Rating value must be finite, got {}",
            value
        )));
    }
    Ok(())
}

pub fn validate_fraction(name: &str, fraction: f64) -> RecResult<()> {
    if !fraction.is_finite() || !(0.0..=1.0).contains(&fraction) {
        return Err(RecError::InvalidInput(format!(
            "{} must be between 0.0 and 1.0, got {}",
            name, fraction
        )));
    }
    Ok(())
}

pub fn validate_hyperparameters(factors: usize, learning_rate: f64, regularization: f64) -> RecResult<()> {
    if factors == 0 {
        return Err(RecError::InvalidInput("Factor count must be greater than 0".to_string()));
    }

    if !learning_rate.is_finite() || learning_rate <= 0.0 {
        return Err(RecError::InvalidInput(format!(
            "Learning rate must be positive, got {}",
            learning_rate
        )));
    }

    if !regularization.is_finite() || regularization < 0.0 {
        return Err(RecError::InvalidInput(format!(
            "Regularization must be non-negative, got {}",
            regularization
        )));
    }

    Ok(())
}

pub fn validate_distribution(mean: f64, std_dev: f64) -> RecResult<()> {
    if !mean.is_finite() || !std_dev.is_finite() || std_dev < 0.0 {
        return Err(RecError::InvalidInput(format!(
            "Invalid normal distribution N({}, {})",
            mean, std_dev
        )));
    }
    Ok(())
}

pub fn validate_factor_count(expected: usize, actual: usize) -> RecResult<()> {
    if expected != actual {
        return Err(RecError::DimensionMismatch { expected, actual });
    }
    Ok(())
}

pub fn validate_num_recommendations(limit: usize, max_limit: usize) -> RecResult<()> {
    if limit == 0 {
        return Err(RecError::InvalidInput(
            "Number of recommendations must be greater than 0".to_string(),
        ));
    }

    if limit > max_limit {
        return Err(RecError::InvalidInput(format!(
            "Number of recommendations too large: {} (max {})",
            limit, max_limit
        )));
    }

    Ok(())
}

/// Usernames become file names in the directory rating source.
pub fn validate_username(username: &str) -> RecResult<()> {
    if username.is_empty() || username.len() > 64 {
        return Err(RecError::InvalidInput(
            "Username must be between 1 and 64 characters".to_string(),
        ));
    }

    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(RecError::InvalidInput(format!("Invalid username: {}", username)));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rating_value() {
        assert!(validate_rating_value(7.5).is_ok());
        assert!(validate_rating_value(f64::NAN).is_err());
        assert!(validate_rating_value(f64::INFINITY).is_err());
    }

    #[test]
    fn test_validate_fraction() {
        assert!(validate_fraction("test fraction", 0.0).is_ok());
        assert!(validate_fraction("test fraction", 1.0).is_ok());
        assert!(validate_fraction("test fraction", 1.5).is_err());
        assert!(validate_fraction("test fraction", -0.1).is_err());
    }

    #[test]
    fn test_validate_hyperparameters() {
        assert!(validate_hyperparameters(150, 0.001, 0.02).is_ok());
        assert!(validate_hyperparameters(0, 0.001, 0.02).is_err());
        assert!(validate_hyperparameters(10, 0.0, 0.02).is_err());
        assert!(validate_hyperparameters(10, 0.01, -1.0).is_err());
    }

    #[test]
    fn test_validate_factor_count() {
        assert!(validate_factor_count(3, 3).is_ok());
        assert!(matches!(
            validate_factor_count(3, 4),
            Err(RecError::DimensionMismatch { expected: 3, actual: 4 })
        ));
    }

    #[test]
    fn test_validate_username() {
        assert!(validate_username("film_buff-42").is_ok());
        assert!(validate_username("").is_err());
        assert!(validate_username("../etc/passwd").is_err());
    }
}
