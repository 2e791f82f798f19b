//! CDL text parser.
//!
//! Reads the network Common Data form Language emitted by `ncdump` (and
//! accepted by `ncgen`): a `dimensions:` section, a `variables:` section with
//! declarations and attributes, and an optional `data:` section. Groups and
//! user-defined types are not supported.

use std::collections::BTreeMap;

use tracing::debug;

use crate::error::{NetCdfError, NetCdfResult};
use crate::raw::{AttrValue, NcType, RawDataset, RawDimension, RawVariable};

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Word(String),
    Str(String),
    Punct(char),
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    line: usize,
}

const PUNCT: &[char] = &['=', ';', ',', '(', ')', ':', '{', '}'];

// Type suffixes on CDL numeric literals (`-32767s`, `1.5f`, `3LL`, `7UB`).
const NUMERIC_SUFFIXES: &[char] = &['b', 'B', 's', 'S', 'f', 'F', 'd', 'D', 'l', 'L', 'u', 'U'];

fn tokenize(text: &str) -> NetCdfResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();
    let mut line = 1;

    while let Some(c) = chars.next() {
        match c {
            '\n' => line += 1,
            c if c.is_whitespace() => {}
            '/' if chars.peek() == Some(&'/') => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        line += 1;
                        break;
                    }
                }
            }
            '"' => {
                let start = line;
                let mut s = String::new();
                let mut closed = false;
                while let Some(c) = chars.next() {
                    match c {
                        '"' => {
                            closed = true;
                            break;
                        }
                        '\\' => match chars.next() {
                            Some('n') => s.push('\n'),
                            Some('t') => s.push('\t'),
                            Some(other) => s.push(other),
                            None => break,
                        },
                        '\n' => {
                            line += 1;
                            s.push('\n');
                        }
                        other => s.push(other),
                    }
                }
                if !closed {
                    return Err(NetCdfError::syntax(start, "unterminated string"));
                }
                tokens.push(Token {
                    tok: Tok::Str(s),
                    line: start,
                });
            }
            c if PUNCT.contains(&c) => tokens.push(Token {
                tok: Tok::Punct(c),
                line,
            }),
            c => {
                let mut word = String::new();
                let mut current = Some(c);
                while let Some(c) = current {
                    if c == '\\' {
                        if let Some(escaped) = chars.next() {
                            word.push(escaped);
                        }
                    } else {
                        word.push(c);
                    }
                    current = match chars.peek() {
                        Some(&n) if !n.is_whitespace() && !PUNCT.contains(&n) && n != '"' => {
                            chars.next()
                        }
                        _ => None,
                    };
                }
                tokens.push(Token {
                    tok: Tok::Word(word),
                    line,
                });
            }
        }
    }

    Ok(tokens)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Dimensions,
    Variables,
    Data,
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    dataset: RawDataset,
    // Variables that received values in the data section.
    filled: Vec<bool>,
}

/// Parse CDL text into a [`RawDataset`].
pub fn parse_cdl(text: &str) -> NetCdfResult<RawDataset> {
    let mut parser = Parser {
        tokens: tokenize(text)?,
        pos: 0,
        dataset: RawDataset::default(),
        filled: Vec::new(),
    };
    parser.parse()?;
    parser.finish()
}

impl Parser {
    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn line(&self) -> usize {
        self.peek_at(0)
            .or_else(|| self.tokens.last())
            .map(|t| t.line)
            .unwrap_or(1)
    }

    fn next(&mut self) -> NetCdfResult<Token> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| NetCdfError::syntax(self.line(), "unexpected end of input"))?;
        self.pos += 1;
        Ok(token)
    }

    fn is_punct(&self, offset: usize, c: char) -> bool {
        matches!(self.peek_at(offset), Some(Token { tok: Tok::Punct(p), .. }) if *p == c)
    }

    fn word_at(&self, offset: usize) -> Option<&str> {
        match self.peek_at(offset) {
            Some(Token {
                tok: Tok::Word(w), ..
            }) => Some(w),
            _ => None,
        }
    }

    fn expect_punct(&mut self, c: char) -> NetCdfResult<()> {
        let token = self.next()?;
        match token.tok {
            Tok::Punct(p) if p == c => Ok(()),
            other => Err(NetCdfError::syntax(
                token.line,
                format!("expected '{}', found {:?}", c, other),
            )),
        }
    }

    fn expect_word(&mut self) -> NetCdfResult<String> {
        let token = self.next()?;
        match token.tok {
            Tok::Word(w) => Ok(w),
            other => Err(NetCdfError::syntax(
                token.line,
                format!("expected a name, found {:?}", other),
            )),
        }
    }

    /// `dimensions:` style header: a keyword and a colon ending the line.
    fn section_header(&self) -> Option<Section> {
        let section = match self.word_at(0)? {
            "dimensions" => Section::Dimensions,
            "variables" => Section::Variables,
            "data" => Section::Data,
            _ => return None,
        };
        if !self.is_punct(1, ':') {
            return None;
        }
        let colon_line = self.peek_at(1)?.line;
        match self.peek_at(2) {
            Some(next) if next.line == colon_line => None,
            _ => Some(section),
        }
    }

    fn parse(&mut self) -> NetCdfResult<()> {
        let keyword = self.expect_word()?;
        if !keyword.eq_ignore_ascii_case("netcdf") {
            return Err(NetCdfError::syntax(
                self.line(),
                format!("expected 'netcdf', found '{}'", keyword),
            ));
        }
        self.dataset.name = self.expect_word()?;
        self.expect_punct('{')?;

        let mut section = None;
        loop {
            if self.is_punct(0, '}') {
                self.pos += 1;
                return Ok(());
            }
            if let Some(next) = self.section_header() {
                section = Some(next);
                self.pos += 2;
                continue;
            }
            if self.word_at(0) == Some("group") && self.is_punct(1, ':') {
                return Err(NetCdfError::syntax(self.line(), "groups are not supported"));
            }
            match section {
                Some(Section::Dimensions) => self.parse_dimensions()?,
                Some(Section::Variables) => self.parse_variable_statement()?,
                Some(Section::Data) => self.parse_data()?,
                None => {
                    return Err(NetCdfError::syntax(
                        self.line(),
                        "statement outside of any section",
                    ))
                }
            }
        }
    }

    fn parse_dimensions(&mut self) -> NetCdfResult<()> {
        loop {
            let name = self.expect_word()?;
            self.expect_punct('=')?;
            let line = self.line();
            let value = self.expect_word()?;
            let (len, unlimited) = if value.eq_ignore_ascii_case("unlimited") {
                (0, true)
            } else {
                let len = value.parse::<usize>().map_err(|_| {
                    NetCdfError::syntax(line, format!("invalid length '{}' for '{}'", value, name))
                })?;
                (len, false)
            };
            self.dataset.dimensions.push(RawDimension {
                name,
                len,
                unlimited,
            });

            let token = self.next()?;
            match token.tok {
                Tok::Punct(',') => continue,
                Tok::Punct(';') => return Ok(()),
                other => {
                    return Err(NetCdfError::syntax(
                        token.line,
                        format!("expected ',' or ';', found {:?}", other),
                    ))
                }
            }
        }
    }

    fn parse_variable_statement(&mut self) -> NetCdfResult<()> {
        if self.is_punct(0, ':') {
            self.pos += 1;
            return self.parse_global_attribute();
        }

        let line = self.line();
        let first = self.expect_word()?;
        if let Some(dtype) = NcType::parse(&first) {
            if self.is_punct(0, ':') {
                // typed global attribute: `string :title = "..." ;`
                self.pos += 1;
                return self.parse_global_attribute();
            }
            if self.word_at(0).is_some() && self.is_punct(1, ':') {
                // typed variable attribute: `string t2m:units = "K" ;`
                let var = self.expect_word()?;
                self.pos += 1;
                return self.parse_variable_attribute(var);
            }
            return self.parse_declarations(dtype);
        }

        if !self.is_punct(0, ':') {
            return Err(NetCdfError::syntax(
                line,
                format!("unknown type or statement '{}'", first),
            ));
        }
        self.pos += 1;
        self.parse_variable_attribute(first)
    }

    fn parse_declarations(&mut self, dtype: NcType) -> NetCdfResult<()> {
        loop {
            let name = self.expect_word()?;
            let mut dims = Vec::new();
            if self.is_punct(0, '(') {
                self.pos += 1;
                loop {
                    dims.push(self.expect_word()?);
                    let token = self.next()?;
                    match token.tok {
                        Tok::Punct(',') => continue,
                        Tok::Punct(')') => break,
                        other => {
                            return Err(NetCdfError::syntax(
                                token.line,
                                format!("expected ',' or ')', found {:?}", other),
                            ))
                        }
                    }
                }
            }
            for dim in &dims {
                if self.dataset.dimension(dim).is_none() {
                    return Err(NetCdfError::syntax(
                        self.line(),
                        format!("variable '{}' uses undeclared dimension '{}'", name, dim),
                    ));
                }
            }
            self.dataset.variables.push(RawVariable {
                name,
                dtype,
                dims,
                attributes: BTreeMap::new(),
                values: Vec::new(),
                text: None,
            });
            self.filled.push(false);

            let token = self.next()?;
            match token.tok {
                Tok::Punct(',') => continue,
                Tok::Punct(';') => return Ok(()),
                other => {
                    return Err(NetCdfError::syntax(
                        token.line,
                        format!("expected ',' or ';', found {:?}", other),
                    ))
                }
            }
        }
    }

    fn parse_global_attribute(&mut self) -> NetCdfResult<()> {
        let name = self.expect_word()?;
        self.expect_punct('=')?;
        let value = self.parse_attribute_value(&name)?;
        self.dataset.attributes.insert(name, value);
        Ok(())
    }

    fn parse_variable_attribute(&mut self, var: String) -> NetCdfResult<()> {
        let line = self.line();
        let name = self.expect_word()?;
        self.expect_punct('=')?;
        let value = self.parse_attribute_value(&name)?;
        let variable = self
            .dataset
            .variables
            .iter_mut()
            .find(|v| v.name == var)
            .ok_or_else(|| {
                NetCdfError::syntax(line, format!("attribute on undeclared variable '{}'", var))
            })?;
        variable.attributes.insert(name, value);
        Ok(())
    }

    /// Comma separated literals up to `;`. Adjacent strings are concatenated.
    fn parse_attribute_value(&mut self, name: &str) -> NetCdfResult<AttrValue> {
        let mut text: Option<String> = None;
        let mut numbers = Vec::new();

        loop {
            let token = self.next()?;
            match token.tok {
                Tok::Str(s) => text.get_or_insert_with(String::new).push_str(&s),
                Tok::Word(w) => numbers.push(parse_number(&w, token.line)?),
                other => {
                    return Err(NetCdfError::syntax(
                        token.line,
                        format!("unexpected {:?} in attribute '{}'", other, name),
                    ))
                }
            }
            let sep = self.next()?;
            match sep.tok {
                Tok::Punct(',') => continue,
                Tok::Punct(';') => break,
                other => {
                    return Err(NetCdfError::syntax(
                        sep.line,
                        format!("expected ',' or ';', found {:?}", other),
                    ))
                }
            }
        }

        match (text, numbers.is_empty()) {
            (Some(s), true) => Ok(AttrValue::Text(s)),
            (None, false) => Ok(AttrValue::Numbers(numbers)),
            _ => Err(NetCdfError::syntax(
                self.line(),
                format!("attribute '{}' mixes text and numbers", name),
            )),
        }
    }

    fn parse_data(&mut self) -> NetCdfResult<()> {
        let line = self.line();
        let name = self.expect_word()?;
        self.expect_punct('=')?;

        let index = self
            .dataset
            .variables
            .iter()
            .position(|v| v.name == name)
            .ok_or_else(|| {
                NetCdfError::syntax(line, format!("data for undeclared variable '{}'", name))
            })?;

        let mut values = Vec::new();
        let mut text = String::new();
        loop {
            let token = self.next()?;
            match token.tok {
                Tok::Word(w) if w == "_" => values.push(f64::NAN),
                Tok::Word(w) => values.push(parse_number(&w, token.line)?),
                Tok::Str(s) => text.push_str(&s),
                other => {
                    return Err(NetCdfError::syntax(
                        token.line,
                        format!("unexpected {:?} in data for '{}'", other, name),
                    ))
                }
            }
            let sep = self.next()?;
            match sep.tok {
                Tok::Punct(',') => continue,
                Tok::Punct(';') => break,
                other => {
                    return Err(NetCdfError::syntax(
                        sep.line,
                        format!("expected ',' or ';', found {:?}", other),
                    ))
                }
            }
        }

        let var = &mut self.dataset.variables[index];
        if var.dtype.is_text() {
            var.text = Some(text);
        } else {
            var.values = values;
        }
        self.filled[index] = true;
        Ok(())
    }

    fn finish(mut self) -> NetCdfResult<RawDataset> {
        // Resolve unlimited lengths from the data written along them.
        let unlimited: Vec<String> = self
            .dataset
            .dimensions
            .iter()
            .filter(|d| d.unlimited)
            .map(|d| d.name.clone())
            .collect();
        for dim in unlimited {
            let len = self
                .dataset
                .variables
                .iter()
                .zip(&self.filled)
                .filter(|(v, filled)| **filled && !v.dtype.is_text())
                .find(|(v, _)| v.dims.first() == Some(&dim))
                .map(|(v, _)| {
                    let inner: usize = v.dims[1..]
                        .iter()
                        .filter_map(|d| self.dataset.dimension(d).map(|d| d.len))
                        .product();
                    if inner == 0 {
                        0
                    } else {
                        v.values.len() / inner
                    }
                })
                .unwrap_or(0);
            if let Some(d) = self.dataset.dimensions.iter_mut().find(|d| d.name == dim) {
                d.len = len;
            }
        }

        // Variables without data hold fill values.
        for i in 0..self.dataset.variables.len() {
            if self.filled[i] || self.dataset.variables[i].dtype.is_text() {
                continue;
            }
            let n: usize = self.dataset.shape(&self.dataset.variables[i])?.iter().product();
            self.dataset.variables[i].values = vec![f64::NAN; n];
        }

        self.dataset.validate()?;
        debug!(
            name = %self.dataset.name,
            dimensions = self.dataset.dimensions.len(),
            variables = self.dataset.variables.len(),
            "Parsed CDL"
        );
        Ok(self.dataset)
    }
}

fn parse_number(word: &str, line: usize) -> NetCdfResult<f64> {
    if let Ok(v) = word.parse::<f64>() {
        return Ok(v);
    }
    let stripped = word.trim_end_matches(NUMERIC_SUFFIXES);
    stripped
        .parse::<f64>()
        .map_err(|_| NetCdfError::syntax(line, format!("invalid number '{}'", word)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ERA5: &str = r#"netcdf era5_sample {
dimensions:
	longitude = 3 ;
	latitude = 2 ;
	time = UNLIMITED ; // (2 currently)
variables:
	float longitude(longitude) ;
		longitude:units = "degrees_east" ;
	float latitude(latitude) ;
		latitude:units = "degrees_north" ;
	int time(time) ;
		time:units = "hours since 1900-01-01 00:00:00.0" ;
		time:calendar = "gregorian" ;
	short t2m(time, latitude, longitude) ;
		t2m:scale_factor = 0.5 ;
		t2m:add_offset = 270. ;
		t2m:_FillValue = -32767s ;
		t2m:units = "K" ;
		t2m:long_name = "2 metre temperature" ;

// global attributes:
		:Conventions = "CF-1.6" ;
		:history = "first line\n",
			"second line" ;
data:

 longitude = 100, 100.25, 100.5 ;

 latitude = 10, 9.75 ;

 time = 1078320, 1078321 ;

 t2m =
  0, 2, 4,
  6, 8, 10,
  12, -32767, _,
  1, 1, 1 ;
}
"#;

    #[test]
    fn test_parse_era5_sample() {
        let ds = parse_cdl(ERA5).unwrap();
        assert_eq!(ds.name, "era5_sample");
        let time = ds.dimension("time").unwrap();
        assert!(time.unlimited);
        assert_eq!(time.len, 2);

        let t2m = ds.variable("t2m").unwrap();
        assert_eq!(t2m.dtype, NcType::Short);
        assert_eq!(t2m.dims, vec!["time", "latitude", "longitude"]);
        assert_eq!(ds.shape(t2m).unwrap(), vec![2, 2, 3]);
        assert_eq!(t2m.units(), Some("K"));
        assert_eq!(t2m.attr_f64("_FillValue"), Some(-32767.0));

        let values = t2m.unpacked();
        assert_eq!(values[0], 270.0);
        assert_eq!(values[1], 271.0);
        assert!(values[7].is_nan());
        assert!(values[8].is_nan());

        assert_eq!(
            ds.attributes["history"],
            AttrValue::Text("first line\nsecond line".into())
        );
    }

    #[test]
    fn test_special_floats_and_suffixes() {
        assert!(parse_number("NaNf", 1).unwrap().is_nan());
        assert_eq!(parse_number("-32767s", 1).unwrap(), -32767.0);
        assert_eq!(parse_number("1.e+20f", 1).unwrap(), 1.0e20);
        assert_eq!(parse_number("7UB", 1).unwrap(), 7.0);
        assert!(parse_number("abc", 1).is_err());
    }

    #[test]
    fn test_missing_data_is_fill() {
        let cdl = "netcdf x {\ndimensions:\n n = 2 ;\nvariables:\n double v(n) ;\n}\n";
        let ds = parse_cdl(cdl).unwrap();
        assert!(ds.variable("v").unwrap().values.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_syntax_error_reports_line() {
        let cdl = "netcdf x {\ndimensions:\n n = 2 ;\nvariables:\n double v(n) ;\ndata:\n v = 1 2 ;\n}\n";
        match parse_cdl(cdl) {
            Err(NetCdfError::CdlSyntax { line, .. }) => assert_eq!(line, 7),
            other => panic!("expected syntax error, got {:?}", other),
        }
    }

    #[test]
    fn test_value_count_mismatch() {
        let cdl = "netcdf x {\ndimensions:\n n = 3 ;\nvariables:\n double v(n) ;\ndata:\n v = 1, 2 ;\n}\n";
        assert!(matches!(parse_cdl(cdl), Err(NetCdfError::InvalidFormat(_))));
    }

    #[test]
    fn test_variable_named_data() {
        let cdl = "netcdf x {\ndimensions:\n n = 1 ;\nvariables:\n double data(n) ;\n data:units = \"m\" ;\ndata:\n data = 4 ;\n}\n";
        let ds = parse_cdl(cdl).unwrap();
        let var = ds.variable("data").unwrap();
        assert_eq!(var.units(), Some("m"));
        assert_eq!(var.values, vec![4.0]);
    }
}
