use crate::{ErrorCode, FanloadError};
use arrow::error::ArrowError;

impl From<ArrowError> for FanloadError {
    fn from(err: ArrowError) -> Self {
        match &err {
            ArrowError::SchemaError(msg) => {
                FanloadError::new(ErrorCode::SchemaMismatch, msg.clone())
            }
            ArrowError::ExternalError(inner) => {
                match inner.downcast_ref::<FanloadError>() {
                    Some(fanload) => fanload.clone(),
                    None => FanloadError::new(ErrorCode::Arrow, inner.to_string()),
                }
            }
            _ => FanloadError::new(ErrorCode::Arrow, err.to_string()),
        }
    }
}

impl From<std::io::Error> for FanloadError {
    fn from(err: std::io::Error) -> Self {
        FanloadError::new(ErrorCode::Internal, err.to_string())
    }
}

impl From<serde_json::Error> for FanloadError {
    fn from(err: serde_json::Error) -> Self {
        FanloadError::new(ErrorCode::Serialization, err.to_string())
    }
}

/// Levenshtein-based suggestion for "did you mean" hints.
pub fn find_closest_match(target: &str, options: &[String]) -> Option<String> {
    let mut best_match: Option<&str> = None;
    let mut min_distance = usize::MAX;

    for option in options {
        let distance = levenshtein(target, option);
        if distance < min_distance && distance <= 3 {
            min_distance = distance;
            best_match = Some(option.as_str());
        }
    }

    best_match.map(|s| s.to_string())
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut dp = vec![vec![0; b.len() + 1]; a.len() + 1];

    for (i, row) in dp.iter_mut().enumerate() {
        row[0] = i;
    }
    for (j, val) in dp[0].iter_mut().enumerate() {
        *val = j;
    }

    for i in 1..=a.len() {
        for j in 1..=b.len() {
            let cost = if a[i - 1] == b[j - 1] { 0 } else { 1 };
            dp[i][j] = std::cmp::min(
                std::cmp::min(dp[i - 1][j] + 1, dp[i][j - 1] + 1),
                dp[i - 1][j - 1] + cost,
            );
        }
    }

    dp[a.len()][b.len()]
}
