//! Markdown body parsing into a [`Body`] tree.
//!
//! CommonMark is handled by `pulldown-cmark`. On top of it, block components
//! are written as
//!
//! ```text
//! ::alert{type="warning" dismissible}
//! Some **markdown** content
//! ::
//! ```
//!
//! and nest by using more colons for the outer block.

use crate::node::{Body, BodyNode, Element};
use pulldown_cmark::{CodeBlockKind, Event, HeadingLevel, Options, Parser, Tag};
use std::collections::BTreeMap;

/// Parse markdown text into a body tree.
pub fn parse_body(text: &str) -> Body {
    Body {
        children: parse_blocks(text),
    }
}

/// A component block opening line: colons, name and props.
struct Opening {
    colons: usize,
    name: String,
    props: BTreeMap<String, String>,
}

fn parse_blocks(text: &str) -> Vec<BodyNode> {
    let mut nodes = Vec::new();
    let mut markdown = String::new();
    let mut lines = text.split_inclusive('\n').peekable();
    let mut in_fence = false;

    while let Some(line) = lines.next() {
        if is_fence(line) {
            in_fence = !in_fence;
        }

        let opening = if in_fence { None } else { parse_opening(line) };
        let Some(opening) = opening else {
            markdown.push_str(line);
            continue;
        };

        // Collect the component's inner text up to its matching closing line.
        let mut inner = String::new();
        let mut closed = false;
        let mut inner_fence = false;
        for next in lines.by_ref() {
            if is_fence(next) {
                inner_fence = !inner_fence;
            }
            if !inner_fence && closing_colons(next) == Some(opening.colons) {
                closed = true;
                break;
            }
            inner.push_str(next);
        }

        if !closed {
            // Unterminated blocks stay plain markdown.
            markdown.push_str(line);
            markdown.push_str(&inner);
            continue;
        }

        nodes.extend(parse_markdown(&std::mem::take(&mut markdown)));
        nodes.push(BodyNode::Element(Element {
            tag: opening.name,
            props: opening.props,
            children: parse_blocks(&inner),
        }));
    }

    nodes.extend(parse_markdown(&markdown));
    nodes
}

fn is_fence(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("```") || trimmed.starts_with("~~~")
}

fn closing_colons(line: &str) -> Option<usize> {
    let trimmed = line.trim();
    (trimmed.len() >= 2 && trimmed.chars().all(|c| c == ':')).then_some(trimmed.len())
}

fn parse_opening(line: &str) -> Option<Opening> {
    let trimmed = line.trim();
    let colons = trimmed.chars().take_while(|c| *c == ':').count();
    if colons < 2 {
        return None;
    }

    let rest = &trimmed[colons..];
    let name_len = rest
        .char_indices()
        .find(|(_, c)| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        .map(|(i, _)| i)
        .unwrap_or(rest.len());
    let name = &rest[..name_len];
    if name.is_empty() || !name.starts_with(|c: char| c.is_ascii_alphabetic()) {
        return None;
    }

    let tail = rest[name_len..].trim();
    let props = if tail.is_empty() {
        BTreeMap::new()
    } else {
        let inner = tail.strip_prefix('{')?.strip_suffix('}')?;
        parse_props(inner)?
    };

    Some(Opening {
        colons,
        name: name.to_string(),
        props,
    })
}

/// Parse `key="value" key='value' key=value flag` pairs.
fn parse_props(input: &str) -> Option<BTreeMap<String, String>> {
    let mut props = BTreeMap::new();
    let mut chars = input.chars().peekable();

    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        if chars.peek().is_none() {
            break;
        }

        let mut key = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_whitespace() || c == '=' {
                break;
            }
            key.push(c);
            chars.next();
        }
        if key.is_empty() {
            return None;
        }

        if chars.peek() != Some(&'=') {
            props.insert(key, "true".to_string());
            continue;
        }
        chars.next();

        let value = match chars.peek() {
            Some(&quote) if quote == '"' || quote == '\'' => {
                chars.next();
                let mut value = String::new();
                loop {
                    match chars.next() {
                        Some(c) if c == quote => break,
                        Some(c) => value.push(c),
                        None => return None,
                    }
                }
                value
            }
            _ => {
                let mut value = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() {
                        break;
                    }
                    value.push(c);
                    chars.next();
                }
                value
            }
        };
        props.insert(key, value);
    }

    Some(props)
}

/// Open element on the conversion stack.
struct Frame {
    element: Element,
    /// Children are spliced into the parent on close.
    transparent: bool,
}

fn parse_markdown(text: &str) -> Vec<BodyNode> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let options = Options::ENABLE_TABLES
        | Options::ENABLE_STRIKETHROUGH
        | Options::ENABLE_TASKLISTS
        | Options::ENABLE_FOOTNOTES
        | Options::ENABLE_HEADING_ATTRIBUTES;

    let mut stack = vec![Frame {
        element: Element::new("root"),
        transparent: false,
    }];
    let mut in_table_head = false;

    for event in Parser::new_ext(text, options) {
        match event {
            Event::Start(tag) => {
                let frame = match open_tag(tag, in_table_head) {
                    Some(element) => {
                        if element.tag == "thead" {
                            in_table_head = true;
                        }
                        Frame {
                            element,
                            transparent: false,
                        }
                    }
                    None => Frame {
                        element: Element::new("fragment"),
                        transparent: true,
                    },
                };
                stack.push(frame);
            }
            Event::End(_) => {
                if stack.len() < 2 {
                    continue;
                }
                if let Some(frame) = stack.pop() {
                    let mut element = frame.element;
                    if element.tag == "thead" {
                        in_table_head = false;
                    }
                    if element.tag == "img" {
                        let alt = element.text();
                        element.children.clear();
                        element.props.insert("alt".to_string(), alt);
                    }
                    if let Some(parent) = stack.last_mut() {
                        if frame.transparent {
                            for child in element.children {
                                push_child(&mut parent.element, child);
                            }
                        } else {
                            push_child(&mut parent.element, BodyNode::Element(element));
                        }
                    }
                }
            }
            Event::Text(text) => push_text(&mut stack, &text),
            Event::Code(code) => push_node(
                &mut stack,
                BodyNode::Element(Element::new("code").with_child(BodyNode::text(code.to_string()))),
            ),
            Event::Html(html) | Event::InlineHtml(html) => push_text(&mut stack, &html),
            Event::InlineMath(math) | Event::DisplayMath(math) => push_node(
                &mut stack,
                BodyNode::Element(Element::new("math").with_child(BodyNode::text(math.to_string()))),
            ),
            Event::SoftBreak => push_text(&mut stack, "\n"),
            Event::HardBreak => push_node(&mut stack, BodyNode::Element(Element::new("br"))),
            Event::Rule => push_node(&mut stack, BodyNode::Element(Element::new("hr"))),
            Event::TaskListMarker(checked) => {
                let mut input = Element::new("input").with_prop("type", "checkbox");
                if checked {
                    input.props.insert("checked".to_string(), "true".to_string());
                }
                push_node(&mut stack, BodyNode::Element(input));
            }
            Event::FootnoteReference(label) => push_node(
                &mut stack,
                BodyNode::Element(Element::new("sup").with_prop("footnote", label.to_string())),
            ),
            #[allow(unreachable_patterns)]
            _ => {}
        }
    }

    // Unbalanced input cannot happen with pulldown-cmark; fold leftovers anyway.
    while stack.len() > 1 {
        if let Some(frame) = stack.pop() {
            if let Some(parent) = stack.last_mut() {
                push_child(&mut parent.element, BodyNode::Element(frame.element));
            }
        }
    }

    stack
        .pop()
        .map(|root| root.element.children)
        .unwrap_or_default()
}

fn open_tag(tag: Tag<'_>, in_table_head: bool) -> Option<Element> {
    let element = match tag {
        Tag::Paragraph => Element::new("p"),
        Tag::Heading {
            level, id, classes, ..
        } => {
            let mut el = Element::new(heading_tag(level));
            if let Some(id) = id {
                el.props.insert("id".to_string(), id.to_string());
            }
            if !classes.is_empty() {
                let classes: Vec<String> = classes.iter().map(|c| c.to_string()).collect();
                el.props.insert("class".to_string(), classes.join(" "));
            }
            el
        }
        Tag::BlockQuote(_) => Element::new("blockquote"),
        Tag::CodeBlock(kind) => {
            let mut el = Element::new("pre");
            if let CodeBlockKind::Fenced(info) = kind {
                let language = info.split_whitespace().next().unwrap_or("");
                if !language.is_empty() {
                    el.props.insert("language".to_string(), language.to_string());
                }
            }
            el
        }
        Tag::List(Some(start)) => Element::new("ol").with_prop("start", start.to_string()),
        Tag::List(None) => Element::new("ul"),
        Tag::Item => Element::new("li"),
        Tag::FootnoteDefinition(label) => {
            Element::new("footnote").with_prop("label", label.to_string())
        }
        Tag::Table(_) => Element::new("table"),
        Tag::TableHead => Element::new("thead"),
        Tag::TableRow => Element::new("tr"),
        Tag::TableCell => Element::new(if in_table_head { "th" } else { "td" }),
        Tag::Emphasis => Element::new("em"),
        Tag::Strong => Element::new("strong"),
        Tag::Strikethrough => Element::new("del"),
        Tag::Link {
            dest_url, title, ..
        } => {
            let mut el = Element::new("a").with_prop("href", dest_url.to_string());
            if !title.is_empty() {
                el.props.insert("title".to_string(), title.to_string());
            }
            el
        }
        Tag::Image {
            dest_url, title, ..
        } => {
            let mut el = Element::new("img").with_prop("src", dest_url.to_string());
            if !title.is_empty() {
                el.props.insert("title".to_string(), title.to_string());
            }
            el
        }
        _ => return None,
    };
    Some(element)
}

fn heading_tag(level: HeadingLevel) -> &'static str {
    match level {
        HeadingLevel::H1 => "h1",
        HeadingLevel::H2 => "h2",
        HeadingLevel::H3 => "h3",
        HeadingLevel::H4 => "h4",
        HeadingLevel::H5 => "h5",
        HeadingLevel::H6 => "h6",
    }
}

fn push_text(stack: &mut [Frame], text: &str) {
    push_node(stack, BodyNode::text(text));
}

fn push_node(stack: &mut [Frame], node: BodyNode) {
    if let Some(frame) = stack.last_mut() {
        push_child(&mut frame.element, node);
    }
}

/// Append a child, merging adjacent text nodes.
fn push_child(parent: &mut Element, node: BodyNode) {
    if let BodyNode::Text { value } = &node {
        if let Some(BodyNode::Text { value: last }) = parent.children.last_mut() {
            last.push_str(value);
            return;
        }
    }
    parent.children.push(node);
}
