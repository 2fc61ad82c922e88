//! Prompt assembly.
//!
//! Pure: the same preamble, context entries and message always produce the
//! same [`Prompt`]. The mode is fixed at construction so one deployment never
//! mixes the chat and text shapes.

use relay_core::config::PromptMode;

use crate::provider::{Message, Prompt, Role};
use crate::window::ContextEntry;

/// Heading placed between the preamble and the rendered context in chat mode.
const CONTEXT_HEADING: &str = "\nContext messages:";
/// Separates the context from the new message in text mode.
const MESSAGE_SEPARATOR: &str = "\n---\n";

#[derive(Debug, Clone)]
pub struct PromptBuilder {
    mode: PromptMode,
    preamble: String,
    postamble: String,
}

impl PromptBuilder {
    pub fn new(mode: PromptMode, preamble: impl Into<String>) -> Self {
        Self {
            mode,
            preamble: preamble.into(),
            postamble: String::new(),
        }
    }

    /// Text inserted after the separator in text mode. Ignored in chat mode.
    pub fn with_postamble(mut self, postamble: impl Into<String>) -> Self {
        self.postamble = postamble.into();
        self
    }

    pub fn mode(&self) -> PromptMode {
        self.mode
    }

    /// Build the payload for `message` given the prior `context`, oldest first.
    pub fn build<'a, I>(&self, context: I, message: &ContextEntry) -> Prompt
    where
        I: IntoIterator<Item = &'a ContextEntry>,
    {
        match self.mode {
            PromptMode::Chat => self.build_chat(context, message),
            PromptMode::Completion => self.build_text(context, message),
        }
    }

    fn build_chat<'a, I>(&self, context: I, message: &ContextEntry) -> Prompt
    where
        I: IntoIterator<Item = &'a ContextEntry>,
    {
        let rendered: Vec<String> = context.into_iter().map(ContextEntry::render).collect();
        let mut system = self.preamble.clone();
        system.push_str(CONTEXT_HEADING);
        for entry in &rendered {
            system.push_str(entry);
            system.push_str("\n\n");
        }

        Prompt::Chat {
            system,
            messages: vec![Message {
                role: Role::User,
                content: message.render(),
            }],
        }
    }

    fn build_text<'a, I>(&self, context: I, message: &ContextEntry) -> Prompt
    where
        I: IntoIterator<Item = &'a ContextEntry>,
    {
        let mut prompt = self.preamble.clone();
        for entry in context {
            prompt.push_str(&entry.render());
        }
        prompt.push_str(MESSAGE_SEPARATOR);
        prompt.push_str(&self.postamble);
        prompt.push_str(&message.render());
        Prompt::Text(prompt)
    }
}
