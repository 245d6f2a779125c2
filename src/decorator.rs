//! Hooks that may change a message after it is built and before it is
//! serialised.
//!
//! Decorators form a chain of responsibility. Each one receives the rest of
//! the chain and decides whether to pass the message on; one that returns
//! without calling [`DecoratorChain::proceed`] stops it.

use std::{fmt, sync::Arc};

use lettre::message::header::Subject;

use crate::{
    event::Event,
    mime::{self, Message},
};

pub trait Decorator: Send + Sync {
    /// Change `message` as needed, then usually call `next.proceed(..)`.
    fn decorate_message(&self, event: &Event, message: &mut Message, next: DecoratorChain<'_>);
}

/// The decorators still to run. The last one in the slice runs next.
#[derive(Clone, Copy)]
pub struct DecoratorChain<'a> {
    remaining: &'a [Arc<dyn Decorator>],
}

impl<'a> DecoratorChain<'a> {
    #[must_use]
    pub const fn new(decorators: &'a [Arc<dyn Decorator>]) -> Self {
        Self {
            remaining: decorators,
        }
    }

    /// Hand the message to the next decorator, if there is one.
    pub fn proceed(self, event: &Event, message: &mut Message) {
        if let Some((next, rest)) = self.remaining.split_last() {
            next.decorate_message(event, message, Self::new(rest));
        }
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.remaining.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.remaining.is_empty()
    }
}

impl fmt::Debug for DecoratorChain<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecoratorChain")
            .field("remaining", &self.remaining.len())
            .finish()
    }
}

/// Sets `Subject` from the event, behind the configured prefix.
#[derive(Debug, Clone, Default)]
pub struct SubjectDecorator {
    prefix: Option<String>,
}

impl SubjectDecorator {
    #[must_use]
    pub const fn new(prefix: Option<String>) -> Self {
        Self { prefix }
    }

    fn subject(&self, event: &Event) -> String {
        let summary = if event.summary.is_empty() {
            format!("{} {} {}", event.realm, event.target, event.category)
        } else {
            event.summary.clone()
        };

        match &self.prefix {
            Some(prefix) => format!("{prefix} {summary}"),
            None => summary,
        }
    }
}

impl Decorator for SubjectDecorator {
    fn decorate_message(&self, event: &Event, message: &mut Message, next: DecoratorChain<'_>) {
        let subject = mime::single_line(&self.subject(event));
        message.headers_mut().set(Subject::from(subject));
        next.proceed(event, message);
    }
}
