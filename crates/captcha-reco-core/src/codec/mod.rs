pub mod greedy;
pub mod vocabulary;

pub use vocabulary::{BLANK_INDEX, CAPTCHA_ALPHABET, Vocabulary};
