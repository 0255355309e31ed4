//! Core traits and types for the voice agent orchestration engine.
//!
//! This crate provides the foundational types shared across every other
//! crate: the audio data model, the conversation/turn history, the tool
//! and provider abstractions, playback handles, and the error taxonomy.
//! Nothing in here talks to a network, a file, or a codec directly — those
//! live in `voxrelay-transport`, `voxrelay-llm`, `voxrelay-tools`, and
//! `voxrelay-agent`.

pub mod audio;
pub mod conversation;
pub mod error;
pub mod playback;
pub mod provider;
pub mod tool;

pub use audio::{AudioEncoding, AudioFrame, AudioProfile, Direction};
pub use conversation::{ConversationHistory, Message, Role, ToolCallRef, TurnIndex};
pub use error::{Error, Result};
pub use playback::{PlaybackHandle, PlaybackState};
pub use provider::{Provider, ProviderCapabilities, ProviderEvent, ToolCallingPolicy};
pub use tool::{ToolDefinition, ToolInvocation, ToolOutput, ToolPhase, ToolStatus};
