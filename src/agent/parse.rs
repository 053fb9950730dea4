use crate::domain::Decision;
use crate::error::OracleError;

/// A parsed oracle reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleReply {
    pub recommendation: Decision,
    /// Full reply text, kept for the audit trail only
    pub rationale: String,
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// True if `token` occurs in `text` as a whole word
fn contains_token(text: &str, token: &str) -> bool {
    text.match_indices(token).any(|(start, _)| {
        let before = text[..start].chars().next_back();
        let after = text[start + token.len()..].chars().next();
        !before.is_some_and(is_word_char) && !after.is_some_and(is_word_char)
    })
}

/// Extract the decision token from free text.
///
/// Exactly one of `CLOSE_ALL` / `HOLD_POSITIONS` must appear. No token, or
/// both, is a malformed reply; nothing is guessed from the rationale.
pub fn parse_reply(oracle: &str, text: &str) -> Result<OracleReply, OracleError> {
    let close = contains_token(text, Decision::CloseAll.token());
    let hold = contains_token(text, Decision::Hold.token());

    let recommendation = match (close, hold) {
        (true, false) => Decision::CloseAll,
        (false, true) => Decision::Hold,
        (true, true) => {
            return Err(OracleError::MalformedResponse {
                oracle: oracle.to_string(),
                reason: "reply contains both decision tokens".to_string(),
            })
        }
        (false, false) => {
            return Err(OracleError::MalformedResponse {
                oracle: oracle.to_string(),
                reason: "reply contains no decision token".to_string(),
            })
        }
    };

    Ok(OracleReply {
        recommendation,
        rationale: text.trim().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_first_line_token() {
        let reply = parse_reply("o1", "CLOSE_ALL\nLosses are accelerating.").unwrap();
        assert_eq!(reply.recommendation, Decision::CloseAll);
        assert!(reply.rationale.contains("accelerating"));

        let reply = parse_reply("o1", "**HOLD_POSITIONS** - drawdown is noise").unwrap();
        assert_eq!(reply.recommendation, Decision::Hold);
    }

    #[test]
    fn test_token_may_appear_after_rationale() {
        let reply = parse_reply("o1", "Given the funding rates, my answer: HOLD_POSITIONS.").unwrap();
        assert_eq!(reply.recommendation, Decision::Hold);
    }

    #[test]
    fn test_missing_token_is_malformed() {
        let err = parse_reply("o1", "I would probably hold for now.").unwrap_err();
        assert!(matches!(err, OracleError::MalformedResponse { .. }));
    }

    #[test]
    fn test_both_tokens_is_malformed() {
        let err = parse_reply("o1", "Either CLOSE_ALL or HOLD_POSITIONS could work").unwrap_err();
        assert!(matches!(err, OracleError::MalformedResponse { .. }));
    }

    #[test]
    fn test_lowercase_and_embedded_tokens_do_not_count() {
        assert!(parse_reply("o1", "close_all").is_err());
        assert!(parse_reply("o1", "XCLOSE_ALL").is_err());
        assert!(parse_reply("o1", "CLOSE_ALL_NOW").is_err());
    }
}
