//! Completion response model and streamed chunk merging.
//!
//! A [`Response`] is the accumulated result of a turn. Streamed
//! [`ResponseChunk`]s are merged into it choice-by-choice; a full snapshot
//! replaces it wholesale.

use serde::{Deserialize, Serialize};

pub const ASSISTANT_ROLE: &str = "assistant";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub choices: Vec<Choice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub usage: Usage,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub index: i32,
    #[serde(default)]
    pub finish_reason: String,
    #[serde(default)]
    pub message: ResponseMessage,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseMessage {
    #[serde(default)]
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refusal: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<FunctionCall>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<i32>,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseChunk {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub index: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<Delta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refusal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<DeltaFunctionCall>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeltaFunctionCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

impl Response {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a streamed chunk. Choices are matched by `index`; unknown indices
    /// open a new assistant choice unless the delta names another role.
    pub fn push_chunk(&mut self, chunk: ResponseChunk) {
        if !chunk.id.is_empty() && self.id.is_none() {
            self.id = Some(chunk.id);
        }
        if let Some(created) = chunk.created {
            self.created = Some(created);
        }
        if let Some(model) = chunk.model {
            self.model = Some(model);
        }
        if let Some(usage) = chunk.usage {
            self.usage.completion_tokens = self
                .usage
                .completion_tokens
                .saturating_add(usage.completion_tokens);
            self.usage.prompt_tokens = self.usage.prompt_tokens.saturating_add(usage.prompt_tokens);
            self.usage.total_tokens = self.usage.total_tokens.saturating_add(usage.total_tokens);
        }

        for choice in chunk.choices {
            let position = self.choices.iter().position(|c| c.index == choice.index);
            let existing = match position {
                Some(i) => &mut self.choices[i],
                None => {
                    self.choices.push(Choice {
                        index: choice.index,
                        finish_reason: String::new(),
                        message: ResponseMessage {
                            role: ASSISTANT_ROLE.to_string(),
                            ..ResponseMessage::default()
                        },
                    });
                    let last = self.choices.len() - 1;
                    &mut self.choices[last]
                }
            };

            if let Some(delta) = choice.delta {
                existing.message.apply_delta(delta);
            }
            if let Some(finish_reason) = choice.finish_reason {
                existing.finish_reason = finish_reason;
            }
        }
    }

    /// Content of the latest assistant-role choice.
    pub fn last_assistant_content(&self) -> Option<&str> {
        self.choices
            .iter()
            .rev()
            .find(|c| c.message.role == ASSISTANT_ROLE)
            .and_then(|c| c.message.content.as_deref())
    }

    pub fn last_assistant_reasoning(&self) -> Option<&str> {
        self.choices
            .iter()
            .rev()
            .find(|c| c.message.role == ASSISTANT_ROLE)
            .and_then(|c| c.message.reasoning.as_deref())
    }
}

impl ResponseMessage {
    pub fn apply_delta(&mut self, delta: Delta) {
        if let Some(role) = delta.role
            && !role.is_empty()
        {
            self.role = role;
        }
        if let Some(content) = delta.content {
            self.content.get_or_insert_with(String::new).push_str(&content);
        }
        if let Some(reasoning) = delta.reasoning {
            self.reasoning
                .get_or_insert_with(String::new)
                .push_str(&reasoning);
        }
        if let Some(refusal) = delta.refusal {
            self.refusal.get_or_insert_with(String::new).push_str(&refusal);
        }
        for call in delta.tool_calls.into_iter().flatten() {
            self.apply_tool_call_delta(call);
        }
    }

    fn apply_tool_call_delta(&mut self, delta: DeltaFunctionCall) {
        let existing = match (delta.index, delta.id.as_deref()) {
            (Some(index), _) => self.tool_calls.iter_mut().find(|c| c.index == Some(index)),
            (None, Some(id)) => self.tool_calls.iter_mut().find(|c| c.id == id),
            (None, None) => None,
        };

        if let Some(call) = existing {
            if let Some(id) = delta.id {
                call.id = id;
            }
            if let Some(name) = delta.name {
                call.name.push_str(&name);
            }
            if let Some(arguments) = delta.arguments {
                call.arguments.push_str(&arguments);
            }
            return;
        }

        self.tool_calls.push(FunctionCall {
            index: delta.index,
            id: delta.id.unwrap_or_default(),
            name: delta.name.unwrap_or_default(),
            arguments: delta.arguments.unwrap_or_default(),
        });
    }
}

impl ResponseChunk {
    /// Assistant text chunk on choice 0.
    pub fn from_text(text: &str) -> Self {
        Self {
            choices: vec![ChunkChoice {
                index: 0,
                delta: Some(Delta {
                    role: Some(ASSISTANT_ROLE.to_string()),
                    content: Some(text.to_string()),
                    ..Delta::default()
                }),
                finish_reason: None,
            }],
            ..Self::default()
        }
    }

    pub fn from_reasoning(reasoning: &str) -> Self {
        Self {
            choices: vec![ChunkChoice {
                index: 0,
                delta: Some(Delta {
                    role: Some(ASSISTANT_ROLE.to_string()),
                    reasoning: Some(reasoning.to_string()),
                    ..Delta::default()
                }),
                finish_reason: None,
            }],
            ..Self::default()
        }
    }
}

impl Response {
    /// Single-choice assistant response holding `text`.
    pub fn from_text(text: &str) -> Self {
        Self {
            choices: vec![Choice {
                index: 0,
                finish_reason: "stop".to_string(),
                message: ResponseMessage {
                    role: ASSISTANT_ROLE.to_string(),
                    content: Some(text.to_string()),
                    ..ResponseMessage::default()
                },
            }],
            ..Self::default()
        }
    }
}
