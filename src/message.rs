use crate::error::ConfigError;
use crate::models::Expose;

/// Expose fields that may appear as `{placeholder}` in a message template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
    Title,
    Rooms,
    Size,
    Price,
    Url,
    Address,
    Durations,
}

impl Placeholder {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "title" => Some(Self::Title),
            "rooms" => Some(Self::Rooms),
            "size" => Some(Self::Size),
            "price" => Some(Self::Price),
            "url" => Some(Self::Url),
            "address" => Some(Self::Address),
            "durations" => Some(Self::Durations),
            _ => None,
        }
    }

    fn value<'e>(&self, expose: &'e Expose) -> &'e str {
        match self {
            Self::Title => &expose.title,
            Self::Rooms => &expose.rooms,
            Self::Size => &expose.size,
            Self::Price => &expose.price,
            Self::Url => &expose.url,
            Self::Address => &expose.address,
            Self::Durations => expose.durations.as_deref().unwrap_or(""),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Field(Placeholder),
}

/// A message template, checked once when the config is loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageFormat {
    segments: Vec<Segment>,
}

impl MessageFormat {
    /// Parses a template. `{{` and `}}` produce literal braces.
    pub fn parse(template: &str) -> Result<Self, ConfigError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = template.char_indices().peekable();

        while let Some((pos, c)) = chars.next() {
            match c {
                '{' if matches!(chars.peek(), Some((_, '{'))) => {
                    chars.next();
                    literal.push('{');
                }
                '}' if matches!(chars.peek(), Some((_, '}'))) => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some((_, '}')) => break,
                            Some((_, '{')) | None => return Err(ConfigError::UnbalancedBrace(pos)),
                            Some((_, ch)) => name.push(ch),
                        }
                    }
                    let field = Placeholder::from_name(name.trim())
                        .ok_or_else(|| ConfigError::UnknownPlaceholder(name.clone()))?;
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Field(field));
                }
                '}' => return Err(ConfigError::UnbalancedBrace(pos)),
                _ => literal.push(c),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self { segments })
    }

    pub fn render(&self, expose: &Expose) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field(field) => out.push_str(field.value(expose)),
            }
        }
        out.trim().to_string()
    }
}
