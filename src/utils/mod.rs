pub mod http;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::service::lead::Language;

static PHONE_RUN_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\d\s\-\+\(\)]{7,}").unwrap());

static REFERRAL_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"ref_(\w+)").unwrap());

/// Parameters carried by a `/start <payload>` deep link.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartPayload {
    pub language: Option<Language>,
    pub referral_code: Option<String>,
}

pub fn parse_start_payload(payload: &str) -> StartPayload {
    let payload = payload.trim();

    let language = if payload.contains("lang_uz") {
        Some(Language::Uzbek)
    } else if payload.contains("lang_ru") {
        Some(Language::Russian)
    } else if payload.contains("lang_kk") {
        Some(Language::Karakalpak)
    } else {
        None
    };

    let referral_code = REFERRAL_REGEX
        .captures(payload)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string());

    StartPayload {
        language,
        referral_code,
    }
}

/// Keeps digits and `+`; long numbers without a leading `+` get one.
pub fn normalize_phone_number(raw: &str) -> String {
    let mut normalized: String = raw.chars().filter(|c| c.is_ascii_digit() || *c == '+').collect();

    if normalized.len() > 10 && !normalized.starts_with('+') {
        normalized.insert(0, '+');
    }

    normalized
}

pub fn is_phone_number(text: &str) -> bool {
    let digits = text.chars().filter(|c| c.is_ascii_digit()).count();
    digits >= 7 && PHONE_RUN_REGEX.is_match(text)
}
