//! Token counting
//!
//! Counts follow the provider's published accounting for chat messages:
//! a fixed overhead per message plus the encoded role and content, plus the
//! priming tokens for the assistant reply.

use once_cell::sync::Lazy;
use tiktoken_rs::{cl100k_base, CoreBPE};

use crate::client::WireMessage;

static BPE: Lazy<CoreBPE> = Lazy::new(|| cl100k_base().expect("tokenizer data is embedded"));

const TOKENS_PER_MESSAGE: usize = 3;
const REPLY_PRIMING_TOKENS: usize = 3;

/// Number of tokens in a text string
pub fn num_tokens_from_string(text: &str) -> usize {
    BPE.encode_with_special_tokens(text).len()
}

/// Number of tokens a message list consumes in a chat request
pub fn num_tokens_from_messages(messages: &[WireMessage]) -> usize {
    let mut total = 0;
    for message in messages {
        total += TOKENS_PER_MESSAGE;
        total += num_tokens_from_string(message.role.as_str());
        total += num_tokens_from_string(&message.content);
    }
    total + REPLY_PRIMING_TOKENS
}
