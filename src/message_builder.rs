//! Per-product message rendering from a `{placeholder}` template.
//!
//! Templates are parsed once. Every syntax problem, unknown name or missing
//! required placeholder surfaces as [`AppError::Template`] from
//! [`MessageTemplate::parse`], so a run never starts with a broken template.

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

use crate::models::{ImageCollection, Product, RenderedMessage};
use crate::utils::error::{AppError, Result};

pub const DEFAULT_TEMPLATE_NAME: &str = "default";
const DEFAULT_TEMPLATE: &str = include_str!("../templates/message_template.txt");

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Placeholder {
    ProductId,
    Title,
    Brand,
    Price,
    SellingPrice,
    Description,
    Sizes,
    Colors,
    Link,
    ImageCount,
}

impl Placeholder {
    pub fn from_name(name: &str) -> Option<Self> {
        let placeholder = match name {
            "product_id" => Placeholder::ProductId,
            "title" | "product_name" => Placeholder::Title,
            "brand" => Placeholder::Brand,
            "price" => Placeholder::Price,
            "selling_price" => Placeholder::SellingPrice,
            "description" => Placeholder::Description,
            "sizes" => Placeholder::Sizes,
            "colors" => Placeholder::Colors,
            "link" | "source_url" => Placeholder::Link,
            "image_count" => Placeholder::ImageCount,
            _ => return None,
        };
        Some(placeholder)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Placeholder::ProductId => "product_id",
            Placeholder::Title => "title",
            Placeholder::Brand => "brand",
            Placeholder::Price => "price",
            Placeholder::SellingPrice => "selling_price",
            Placeholder::Description => "description",
            Placeholder::Sizes => "sizes",
            Placeholder::Colors => "colors",
            Placeholder::Link => "link",
            Placeholder::ImageCount => "image_count",
        }
    }

    fn value(&self, product: &Product, images: &ImageCollection) -> String {
        match self {
            Placeholder::ProductId => product.id.clone(),
            Placeholder::Title => product.title.clone(),
            Placeholder::Brand => product.brand.clone().unwrap_or_default(),
            Placeholder::Price => product.price.clone(),
            Placeholder::SellingPrice => product.display_price(),
            Placeholder::Description => product.description.clone().unwrap_or_default(),
            Placeholder::Sizes => product.sizes.join(","),
            Placeholder::Colors => product.colors.join(" "),
            Placeholder::Link => product.source_url.clone(),
            Placeholder::ImageCount => images.assets.len().to_string(),
        }
    }
}

impl fmt::Display for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field(Placeholder),
}

/// A parsed, validated template.
#[derive(Debug, Clone)]
pub struct MessageTemplate {
    name: String,
    segments: Vec<Segment>,
    required: BTreeSet<Placeholder>,
}

impl MessageTemplate {
    /// Parses `text`. Each entry of `required` must name a known placeholder
    /// that the template uses.
    pub fn parse(name: impl Into<String>, text: &str, required: &[String]) -> Result<Self> {
        let name = name.into();
        let segments = parse_segments(&name, text)?;
        let used: BTreeSet<Placeholder> = segments
            .iter()
            .filter_map(|s| match s {
                Segment::Field(p) => Some(*p),
                Segment::Literal(_) => None,
            })
            .collect();

        let mut required_set = BTreeSet::new();
        for raw in required {
            let placeholder = Placeholder::from_name(raw.trim()).ok_or_else(|| {
                AppError::Template(format!(
                    "{}: required placeholder '{}' is not a known field",
                    name, raw
                ))
            })?;
            if !used.contains(&placeholder) {
                return Err(AppError::Template(format!(
                    "{}: required placeholder {{{}}} does not appear in the template",
                    name, raw
                )));
            }
            required_set.insert(placeholder);
        }

        Ok(Self {
            name,
            segments,
            required: required_set,
        })
    }

    /// Reads the template at `path`, falling back to the bundled default when
    /// the file does not exist.
    pub fn load(path: &Path, required: &[String]) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.display().to_string());
                let template = Self::parse(name, &text, required)?;
                tracing::info!(
                    path = %path.display(),
                    placeholders = ?template.placeholders(),
                    "message template loaded"
                );
                Ok(template)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "template not found, using default");
                Self::builtin(required)
            }
            Err(e) => Err(AppError::Template(format!("cannot read {}: {}", path.display(), e))),
        }
    }

    pub fn builtin(required: &[String]) -> Result<Self> {
        Self::parse(DEFAULT_TEMPLATE_NAME, DEFAULT_TEMPLATE, required)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Placeholders the template uses, in declaration order of [`Placeholder`].
    pub fn placeholders(&self) -> Vec<Placeholder> {
        let used: BTreeSet<Placeholder> = self
            .segments
            .iter()
            .filter_map(|s| match s {
                Segment::Field(p) => Some(*p),
                Segment::Literal(_) => None,
            })
            .collect();
        used.into_iter().collect()
    }
}

fn parse_segments(name: &str, text: &str) -> Result<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut chars = text.char_indices().peekable();

    while let Some((pos, c)) = chars.next() {
        match c {
            '{' if chars.peek().map(|(_, next)| *next) == Some('{') => {
                chars.next();
                literal.push('{');
            }
            '{' => {
                let mut field = String::new();
                let mut closed = false;
                for (_, inner) in chars.by_ref() {
                    match inner {
                        '}' => {
                            closed = true;
                            break;
                        }
                        '{' => break,
                        other => field.push(other),
                    }
                }
                if !closed {
                    return Err(AppError::Template(format!(
                        "{}: unclosed placeholder starting at byte {}",
                        name, pos
                    )));
                }
                let field = field.trim();
                if field.is_empty() {
                    return Err(AppError::Template(format!(
                        "{}: empty placeholder at byte {}",
                        name, pos
                    )));
                }
                let placeholder = Placeholder::from_name(field).ok_or_else(|| {
                    AppError::Template(format!(
                        "{}: unknown placeholder {{{}}} at byte {}",
                        name, field, pos
                    ))
                })?;
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Field(placeholder));
            }
            '}' if chars.peek().map(|(_, next)| *next) == Some('}') => {
                chars.next();
                literal.push('}');
            }
            '}' => {
                return Err(AppError::Template(format!("{}: unmatched '}}' at byte {}", name, pos)));
            }
            other => literal.push(other),
        }
    }

    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Ok(segments)
}

/// Renders messages from one loaded template.
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    template: MessageTemplate,
}

impl MessageBuilder {
    pub fn new(template: MessageTemplate) -> Self {
        Self { template }
    }

    /// Substitutes the product's fields into the template.
    ///
    /// Fails when a required placeholder has no value for this product. The
    /// result is trimmed and depends only on the inputs.
    pub fn render(&self, product: &Product, images: &ImageCollection) -> Result<RenderedMessage> {
        for placeholder in &self.template.required {
            if placeholder.value(product, images).trim().is_empty() {
                return Err(AppError::Template(format!(
                    "required field {{{}}} is empty for product {}",
                    placeholder, product.id
                )));
            }
        }

        let mut body = String::new();
        for segment in &self.template.segments {
            match segment {
                Segment::Literal(text) => body.push_str(text),
                Segment::Field(placeholder) => body.push_str(&placeholder.value(product, images)),
            }
        }

        let body = body.trim().to_string();
        tracing::debug!(product_id = %product.id, chars = body.chars().count(), "message rendered");
        Ok(RenderedMessage {
            product_id: product.id.clone(),
            body,
            template_name: self.template.name.clone(),
        })
    }
}
