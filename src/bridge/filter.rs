//! Message handler pipeline.
//!
//! A pipeline is an ordered list of named handlers bound to one direction.
//! Each handler sees the body produced by the previous one and either passes
//! a (possibly rewritten) body on or drops the message, which stops the
//! chain. Handlers never talk to the networks themselves.

use fancy_regex::Regex;
use tracing::debug;

use crate::bridge::media::NoResizeSwitch;
use crate::common::error::ConfigError;
use crate::common::Side;

/// Direction of message flow for a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Matrix to Murmur.
    AToB,
    /// Murmur to Matrix.
    BToA,
}

impl Direction {
    /// Direction of a message raised by `source`.
    pub fn from_source(source: Side) -> Self {
        match source {
            Side::A => Direction::AToB,
            Side::B => Direction::BToA,
        }
    }

    /// Config key of this direction.
    pub fn key(&self) -> &'static str {
        match self {
            Direction::AToB => "a_to_b",
            Direction::BToA => "b_to_a",
        }
    }
}

/// Outcome of a handler or of a whole pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Deliver(String),
    Drop,
}

/// A single pipeline stage.
pub trait MessageHandler: Send + Sync {
    /// Stable registry name.
    fn name(&self) -> &'static str;

    fn handle(&self, sender: &str, body: String) -> Verdict;
}

/// Ordered chain of handlers for one direction.
pub struct Pipeline {
    direction: Direction,
    stages: Vec<Box<dyn MessageHandler>>,
}

impl Pipeline {
    /// Create a pipeline that delivers everything unchanged.
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            stages: Vec::new(),
        }
    }

    /// Append a stage at the end of the chain.
    pub fn with_stage(mut self, stage: impl MessageHandler + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    /// Build a pipeline from configured handler names, in the given order.
    ///
    /// An unknown name is a configuration error.
    pub fn from_names(
        direction: Direction,
        names: &[String],
        ctx: &HandlerContext,
    ) -> Result<Self, ConfigError> {
        let mut stages = Vec::with_capacity(names.len());
        for name in names {
            let (_, build) = REGISTRY
                .iter()
                .find(|(known, _)| *known == name.as_str())
                .ok_or_else(|| ConfigError::UnknownHandler {
                    name: name.clone(),
                    direction: direction.key().to_string(),
                })?;
            stages.push(build(ctx));
        }
        Ok(Self { direction, stages })
    }

    /// Names of the active stages, in execution order.
    pub fn names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run every stage in order, stopping at the first `Drop`.
    pub fn run(&self, sender: &str, body: &str) -> Verdict {
        let mut body = body.to_string();
        for stage in &self.stages {
            match stage.handle(sender, body) {
                Verdict::Deliver(next) => body = next,
                Verdict::Drop => {
                    debug!(
                        direction = ?self.direction,
                        handler = stage.name(),
                        sender,
                        "Message dropped by handler"
                    );
                    return Verdict::Drop;
                }
            }
        }
        Verdict::Deliver(body)
    }
}

/// Inputs handlers may need when built from the registry.
#[derive(Clone)]
pub struct HandlerContext {
    pub ignored_senders: Vec<String>,
    pub no_resize: NoResizeSwitch,
}

type HandlerFactory = fn(&HandlerContext) -> Box<dyn MessageHandler>;

/// Every handler that can be enabled from configuration.
const REGISTRY: &[(&str, HandlerFactory)] = &[
    (SenderSuppression::NAME, build_sender_suppression),
    (MarkupStripping::NAME, build_markup_stripping),
    (NoResizeDirective::NAME, build_no_resize_directive),
];

/// Whether `name` is a registered handler.
pub fn is_known_handler(name: &str) -> bool {
    REGISTRY.iter().any(|(known, _)| *known == name)
}

fn build_sender_suppression(ctx: &HandlerContext) -> Box<dyn MessageHandler> {
    Box::new(SenderSuppression::new(ctx.ignored_senders.clone()))
}

fn build_markup_stripping(_: &HandlerContext) -> Box<dyn MessageHandler> {
    Box::new(MarkupStripping::new())
}

fn build_no_resize_directive(ctx: &HandlerContext) -> Box<dyn MessageHandler> {
    Box::new(NoResizeDirective::new(ctx.no_resize.clone()))
}

/// Drops messages from automated accounts such as music bots.
#[derive(Debug, Clone)]
pub struct SenderSuppression {
    ignored: Vec<String>,
}

impl SenderSuppression {
    pub const NAME: &'static str = "sender-suppression";

    pub fn new(ignored: Vec<String>) -> Self {
        Self { ignored }
    }
}

impl MessageHandler for SenderSuppression {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn handle(&self, sender: &str, body: String) -> Verdict {
        if self.ignored.iter().any(|name| name == sender) {
            Verdict::Drop
        } else {
            Verdict::Deliver(body)
        }
    }
}

/// Rewrites `<a href="URL">TEXT</a>` anchors to their bare URL.
#[derive(Debug, Clone)]
pub struct MarkupStripping {
    anchor: Regex,
}

impl MarkupStripping {
    pub const NAME: &'static str = "markup-stripping";

    pub fn new() -> Self {
        Self {
            // Lazy quantifiers: each anchor pairs with its own closing tag.
            // Anchor text may wrap lines.
            anchor: Regex::new(r#"(?s)<a href="(.*?)">.*?</a>"#).unwrap(),
        }
    }
}

impl Default for MarkupStripping {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageHandler for MarkupStripping {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn handle(&self, _sender: &str, body: String) -> Verdict {
        Verdict::Deliver(self.anchor.replace_all(&body, "$1").into_owned())
    }
}

/// Literal body that disables downsizing of the next image.
pub const NO_RESIZE_DIRECTIVE: &str = "!noresize";

/// Consumes `!noresize` and arms the media relay's one-shot switch.
#[derive(Debug, Clone)]
pub struct NoResizeDirective {
    switch: NoResizeSwitch,
}

impl NoResizeDirective {
    pub const NAME: &'static str = "noresize-directive";

    pub fn new(switch: NoResizeSwitch) -> Self {
        Self { switch }
    }
}

impl MessageHandler for NoResizeDirective {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn handle(&self, sender: &str, body: String) -> Verdict {
        if body.trim() == NO_RESIZE_DIRECTIVE {
            debug!(sender, "Next image will be relayed without resizing");
            self.switch.arm();
            Verdict::Drop
        } else {
            Verdict::Deliver(body)
        }
    }
}
