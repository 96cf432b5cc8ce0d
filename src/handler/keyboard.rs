use teloxide::types::{ButtonRequest, InlineKeyboardButton, InlineKeyboardMarkup, KeyboardButton, KeyboardMarkup};

use crate::service::{lead::Language, messenger};

pub const LANGUAGE_CALLBACK_PREFIX: &str = "lang_";

fn language_button(language: Language) -> InlineKeyboardButton {
    InlineKeyboardButton::callback(
        messenger::language_button(language),
        format!("{}{}", LANGUAGE_CALLBACK_PREFIX, language.code()),
    )
}

pub fn get_language_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new([
        vec![language_button(Language::Uzbek), language_button(Language::Russian)],
        vec![language_button(Language::Karakalpak)],
    ])
}

pub fn get_contact_keyboard(language: Language) -> KeyboardMarkup {
    KeyboardMarkup::new([[KeyboardButton::new(messenger::contact_button(language)).request(ButtonRequest::Contact)]])
        .resize_keyboard()
        .one_time_keyboard()
}
