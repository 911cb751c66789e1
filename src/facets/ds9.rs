//! DS9 region-file facet parser. A facet is a `polygon(ra, dec, ...)` in
//! degrees, optionally followed by a `# text="label"` comment on the same
//! line and a `point(ra, dec)` reference position on the next.
//!
//! Operates purely on an in-memory string; reading the region file itself
//! is the caller's job.

use crate::error::FacetParseError;
use std::iter::Peekable;
use std::str::Chars;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TokenType {
    Empty,
    Word,
    Number,
    Symbol,
    Comment,
}

#[derive(Clone, Debug, Default)]
pub struct Facet {
    /// `(ra, dec)` in radians, in the order given in the file.
    pub vertices: Vec<(f64, f64)>,
    pub direction_label: Option<String>,
    /// `(ra, dec)` in radians, from a trailing `point(...)` entry.
    pub reference_position: Option<(f64, f64)>,
}

fn is_alpha(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_whitespace(c: char) -> bool {
    c == ' ' || c == '\n' || c == '\r' || c == '\t'
}

fn is_numeric(c: char) -> bool {
    c.is_ascii_digit() || c == '-' || c == '.'
}

struct Lexer<'a> {
    chars: Peekable<Chars<'a>>,
    kind: TokenType,
    text: String,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        let mut lexer = Self {
            chars: input.chars().peekable(),
            kind: TokenType::Empty,
            text: String::new(),
        };
        lexer.advance();
        lexer
    }

    fn advance(&mut self) {
        let mut kind = TokenType::Empty;
        let mut text = String::new();
        loop {
            let c = match self.chars.peek() {
                Some(&c) => c,
                None => break,
            };
            match kind {
                TokenType::Empty => {
                    if is_alpha(c) {
                        kind = TokenType::Word;
                        text.push(c);
                        self.chars.next();
                    } else if is_whitespace(c) {
                        self.chars.next();
                    } else if is_numeric(c) {
                        kind = TokenType::Number;
                        text.push(c);
                        self.chars.next();
                    } else if c == '(' || c == ')' || c == ',' {
                        kind = TokenType::Symbol;
                        text.push(c);
                        self.chars.next();
                        break;
                    } else if c == '#' {
                        kind = TokenType::Comment;
                        self.chars.next();
                    } else {
                        self.chars.next();
                    }
                }
                TokenType::Word => {
                    if is_alpha(c) || c.is_ascii_digit() {
                        text.push(c);
                        self.chars.next();
                    } else {
                        break;
                    }
                }
                TokenType::Number => {
                    if is_numeric(c) {
                        text.push(c);
                        self.chars.next();
                    } else {
                        break;
                    }
                }
                TokenType::Symbol => break,
                TokenType::Comment => {
                    if c == '\n' {
                        self.chars.next();
                        break;
                    } else {
                        text.push(c);
                        self.chars.next();
                    }
                }
            }
        }
        self.kind = kind;
        self.text = text;
    }

    fn skip_line(&mut self) {
        for c in self.chars.by_ref() {
            if c == '\n' {
                break;
            }
        }
        self.advance();
    }
}

fn parse_direction_label(kind: TokenType, comment: &str) -> Option<String> {
    if kind != TokenType::Comment {
        return None;
    }
    let classifier = "text=";
    let start = comment.find(classifier)? + classifier.len();
    let rest = &comment[start..];
    if let Some(quoted) = rest.strip_prefix('"') {
        let end = quoted.find('"')?;
        return Some(quoted[..end].to_string());
    }
    let mut dir = rest.to_string();
    if let Some(i) = dir.find(',') {
        dir.truncate(i);
    }
    if let Some(i) = dir.find(' ') {
        dir.truncate(i);
    }
    if let Some(i) = dir.find('\n') {
        dir.truncate(i);
    }
    Some(dir)
}

fn read_num_list(lex: &mut Lexer) -> Result<Vec<f64>, FacetParseError> {
    if lex.text != "(" {
        return Err(FacetParseError::ExpectedOpenParen(lex.text.clone()));
    }
    lex.advance();
    let mut vals = Vec::new();
    loop {
        if lex.kind == TokenType::Empty {
            return Err(FacetParseError::UnexpectedEof);
        }
        if lex.text == ")" {
            break;
        }
        if lex.kind != TokenType::Number {
            return Err(FacetParseError::ExpectedNumberOrCloseParen);
        }
        let v: f64 = lex
            .text
            .parse()
            .map_err(|_| FacetParseError::NotANumber(lex.text.clone()))?;
        vals.push(v);
        lex.advance();
        if lex.text == "," {
            lex.advance();
        }
    }
    lex.advance();
    Ok(vals)
}

fn read_polygon(lex: &mut Lexer, facet: &mut Facet) -> Result<(), FacetParseError> {
    let vals = read_num_list(lex)?;
    if vals.len() % 2 != 0 {
        return Err(FacetParseError::OddPolygonCoordinateCount(vals.len()));
    }
    for pair in vals.chunks(2) {
        facet.vertices.push((pair[0].to_radians(), pair[1].to_radians()));
    }
    facet.direction_label = parse_direction_label(lex.kind, &lex.text);
    Ok(())
}

fn read_point(lex: &mut Lexer, facet: &mut Facet) -> Result<(), FacetParseError> {
    let vals = read_num_list(lex)?;
    if vals.len() != 2 {
        return Err(FacetParseError::PointExpectsTwoValues(vals.len()));
    }
    facet.reference_position = Some((vals[0].to_radians(), vals[1].to_radians()));
    Ok(())
}

/// Parses the facets out of a DS9 region file's text.
pub fn parse_str(input: &str) -> Result<Vec<Facet>, FacetParseError> {
    let mut lex = Lexer::new(input);
    let mut facets: Vec<Facet> = Vec::new();

    while lex.kind != TokenType::Empty {
        let t = lex.text.clone();
        if t == "global" || t == "fk5" {
            lex.skip_line();
            continue;
        }
        match lex.kind {
            TokenType::Comment => lex.advance(),
            TokenType::Word => {
                lex.advance();
                if t == "polygon" {
                    let mut facet = Facet::default();
                    read_polygon(&mut lex, &mut facet)?;
                    facets.push(facet);
                } else if t == "point" {
                    if let Some(last) = facets.last_mut() {
                        read_point(&mut lex, last)?;
                    }
                }
            }
            _ => lex.advance(),
        }
    }

    Ok(facets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn polygon_with_label_and_point_is_parsed() {
        let text = "global color=green\nfk5\npolygon(10.0,20.0,11.0,20.0,11.0,21.0) # text=\"A\"\npoint(10.5,20.5)\n";
        let facets = parse_str(text).unwrap();
        assert_eq!(facets.len(), 1);
        let facet = &facets[0];
        assert_eq!(facet.vertices.len(), 3);
        assert_relative_eq!(facet.vertices[0].0, 10.0_f64.to_radians());
        assert_eq!(facet.direction_label.as_deref(), Some("A"));
        let reference = facet.reference_position.unwrap();
        assert_relative_eq!(reference.0, 10.5_f64.to_radians());
        assert_relative_eq!(reference.1, 20.5_f64.to_radians());
    }

    #[test]
    fn quoted_label_with_an_embedded_space_keeps_the_whole_word() {
        let text = "polygon(0,0,1,0,1,1) # text=\"Cas A\"\n";
        let facets = parse_str(text).unwrap();
        assert_eq!(facets[0].direction_label.as_deref(), Some("Cas A"));
    }

    #[test]
    fn multiple_polygons_each_get_their_own_facet() {
        let text = "polygon(0,0,1,0,1,1)\npolygon(2,2,3,2,3,3)\n";
        let facets = parse_str(text).unwrap();
        assert_eq!(facets.len(), 2);
        assert_eq!(facets[0].vertices.len(), 3);
        assert_eq!(facets[1].vertices.len(), 3);
    }

    #[test]
    fn odd_coordinate_count_is_rejected() {
        let err = parse_str("polygon(0,0,1)\n").unwrap_err();
        assert!(matches!(err, FacetParseError::OddPolygonCoordinateCount(3)));
    }

    #[test]
    fn last_point_wins_when_several_follow_a_polygon() {
        let text = "polygon(0,0,1,0,1,1)\npoint(5,5)\npoint(6,6)\n";
        let facets = parse_str(text).unwrap();
        let reference = facets[0].reference_position.unwrap();
        assert_relative_eq!(reference.0, 6.0_f64.to_radians());
    }
}
