/// Matches a concrete subject against a NATS-style filter (`*` is one token, `>` the rest).
pub fn subject_matches(filter: &str, subject: &str) -> bool {
    let mut subject_tokens = subject.split('.');

    for token in filter.split('.') {
        match (token, subject_tokens.next()) {
            (">", Some(_)) => return true,
            ("*", Some(_)) => {}
            (expected, Some(actual)) if expected == actual => {}
            _ => return false,
        }
    }

    subject_tokens.next().is_none()
}

/// Whether a subject can be published to.
pub fn is_publishable(subject: &str) -> bool {
    !subject.is_empty()
        && subject
            .split('.')
            .all(|token| !token.is_empty() && token != "*" && token != ">")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        assert!(subject_matches(
            "fhirhose.patient.polled.abc",
            "fhirhose.patient.polled.abc"
        ));
        assert!(!subject_matches(
            "fhirhose.patient.polled.abc",
            "fhirhose.patient.polled.abd"
        ));
    }

    #[test]
    fn test_single_token_wildcard() {
        assert!(subject_matches("fhirhose.*.polled.*", "fhirhose.patient.polled.abc"));
        assert!(!subject_matches("fhirhose.*.polled", "fhirhose.patient.polled.abc"));
    }

    #[test]
    fn test_tail_wildcard() {
        assert!(subject_matches("fhirhose.patient.polled.>", "fhirhose.patient.polled.a.b.c"));
        assert!(!subject_matches("fhirhose.patient.polled.>", "fhirhose.patient.polled"));
        assert!(!subject_matches("fhirhose.patient.polled.>", "fhirhosecl.patient.polled.a"));
    }

    #[test]
    fn test_publishable() {
        assert!(is_publishable("fhirhose.patient.polled.abc"));
        assert!(!is_publishable("fhirhose.patient.>"));
        assert!(!is_publishable("fhirhose..polled"));
        assert!(!is_publishable(""));
    }
}
