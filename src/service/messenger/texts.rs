use crate::service::lead::Language;

const NEUTRAL: &str = "neutral";

/// Bilingual greeting shown before a language is known.
pub fn greeting(first_name: Option<&str>) -> String {
    let name = first_name.map(str::trim).filter(|n| !n.is_empty());
    let name_uz = name.map(|n| format!(" {}", n)).unwrap_or_default();
    let name_ru = name.map(|n| format!(", {}", n)).unwrap_or_default();

    t!("greeting", locale = NEUTRAL, name_uz = name_uz, name_ru = name_ru).to_string()
}

pub fn select_language() -> String {
    t!("select_language", locale = NEUTRAL).to_string()
}

pub fn language_button(language: Language) -> String {
    let key = format!("buttons.language.{}", language.code());
    t!(key, locale = NEUTRAL).to_string()
}

/// First reminder is direct, later ones are softer.
pub fn language_reminder(attempt: u32) -> String {
    if attempt <= 1 {
        t!("reminders.language", locale = NEUTRAL).to_string()
    } else {
        t!("reminders.language_soft", locale = NEUTRAL).to_string()
    }
}

pub fn contact_button(language: Language) -> String {
    t!("buttons.contact", locale = language.code()).to_string()
}

pub fn ask_phone(language: Language) -> String {
    t!("messages.ask_phone", locale = language.code()).to_string()
}

pub fn ask_city(language: Language) -> String {
    t!("messages.ask_city", locale = language.code()).to_string()
}

pub fn final_message(language: Language) -> String {
    t!("messages.final", locale = language.code()).to_string()
}

pub fn phone_reminder(language: Language) -> String {
    t!("reminders.phone", locale = language.code()).to_string()
}

pub fn city_reminder(language: Language) -> String {
    t!("reminders.city", locale = language.code()).to_string()
}
