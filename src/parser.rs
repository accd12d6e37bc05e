//! Text parsers using nom.
//!
//! The command line accepts filters, values and clauses as text. This
//! module turns them into the typed pieces from [`crate::ast`], and also
//! provides the identifier checks the transpiler relies on.
//!
//! # Filter syntax
//!
//! ```text
//! date = 2006-01-05 and symbol != 'A' or trans like 'Some%'
//! ─┬──   ────┬─────  ─┬─
//!  │         │        └── Connector (and / or)
//!  │         └── Value (NULL, bool, number, 'text', date, timestamp, bare word)
//!  └── Column (optionally qualified: demo.date)
//! ```

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while, take_while_m_n},
    character::complete::{alpha1, alphanumeric1, char, digit1, multispace0, multispace1, none_of, satisfy},
    combinator::{all_consuming, map, map_res, not, opt, recognize, rest, value},
    multi::{many0, many0_count},
    sequence::{delimited, pair, terminated, tuple},
    IResult,
};

use crate::ast::*;
use crate::error::{LemkPgError, LemkPgResult};

/// Parse a WHERE filter. Blank input yields an empty filter.
///
/// ```
/// use lemkpg::parser::parse_filter;
///
/// let filter = parse_filter("date = 2006-01-05 or symbol = A").unwrap();
/// assert_eq!(filter.len(), 2);
/// ```
pub fn parse_filter(input: &str) -> LemkPgResult<Filter> {
    if input.trim().is_empty() {
        return Ok(Filter::all());
    }
    finish(input, all_consuming(delimited(multispace0, filter, multispace0))(input), "filter")
}

/// Parse a single value.
pub fn parse_value(input: &str) -> LemkPgResult<Value> {
    finish(input, all_consuming(delimited(multispace0, literal, multispace0))(input), "value")
}

/// Parse a value, taking the whole input as text when it is not a literal.
pub fn parse_value_or_text(input: &str) -> Value {
    parse_value(input).unwrap_or_else(|_| Value::Text(input.to_string()))
}

/// Parse `column = value`.
pub fn parse_assignment(input: &str) -> LemkPgResult<(String, Value)> {
    let result = all_consuming(map(
        tuple((
            multispace0,
            qualified_identifier,
            multispace0,
            char('='),
            multispace0,
            literal,
            multispace0,
        )),
        |(_, column, _, _, _, value, _)| (column.to_string(), value),
    ))(input);
    finish(input, result, "assignment")
}

/// Parse `left op right` where both sides are column references.
pub fn parse_on_clause(input: &str) -> LemkPgResult<OnClause> {
    let result = all_consuming(map(
        tuple((
            multispace0,
            qualified_identifier,
            multispace0,
            operator,
            multispace0,
            qualified_identifier,
            multispace0,
        )),
        |(_, left, _, op, _, right, _)| OnClause::new(left, op, right),
    ))(input);
    finish(input, result, "ON clause")
}

/// Parse `column [asc|desc]`.
pub fn parse_order_by(input: &str) -> LemkPgResult<OrderBy> {
    let result = all_consuming(map(
        tuple((
            multispace0,
            qualified_identifier,
            opt(pair(multispace1, sort_order)),
            multispace0,
        )),
        |(_, column, order, _)| OrderBy {
            column: column.to_string(),
            order: order.map(|(_, o)| o).unwrap_or_default(),
        },
    ))(input);
    finish(input, result, "ORDER BY")
}

/// Parse `name:type`, e.g. `price:numeric(10,2)`.
pub fn parse_column_def(input: &str) -> LemkPgResult<ColumnDef> {
    let result = all_consuming(map(
        tuple((multispace0, identifier, multispace0, char(':'), rest)),
        |(_, name, _, _, data_type): (_, &str, _, _, &str)| ColumnDef::new(name, data_type.trim()),
    ))(input);
    let def = finish(input, result, "column definition")?;
    if def.data_type.is_empty() {
        return Err(LemkPgError::parse(input.len(), "column type is missing"));
    }
    Ok(def)
}

/// Whether `s` is an identifier, optionally qualified once (`schema.table`).
pub fn is_identifier(s: &str) -> bool {
    all_consuming(qualified_identifier)(s).is_ok()
}

/// Whether `s` may appear in a select list: an identifier, `*` or `table.*`.
pub fn is_column_ref(s: &str) -> bool {
    all_consuming(column_ref)(s).is_ok()
}

fn finish<'a, T>(
    input: &'a str,
    result: IResult<&'a str, T>,
    what: &str,
) -> LemkPgResult<T> {
    match result {
        Ok((_, parsed)) => Ok(parsed),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            let position = input.len() - e.input.len();
            let near = if e.input.is_empty() {
                "end of input".to_string()
            } else {
                format!("'{}'", e.input.chars().take(20).collect::<String>())
            };
            Err(LemkPgError::parse(position, format!("invalid {} near {}", what, near)))
        }
        Err(nom::Err::Incomplete(_)) => {
            Err(LemkPgError::parse(input.len(), format!("incomplete {}", what)))
        }
    }
}

fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        alt((alpha1, tag("_"))),
        many0_count(alt((alphanumeric1, tag("_")))),
    ))(input)
}

fn qualified_identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(identifier, opt(pair(char('.'), identifier))))(input)
}

fn column_ref(input: &str) -> IResult<&str, &str> {
    alt((
        tag("*"),
        recognize(tuple((identifier, char('.'), char('*')))),
        qualified_identifier,
    ))(input)
}

/// Succeeds only before whitespace or end of input.
fn token_end(input: &str) -> IResult<&str, ()> {
    not(satisfy(|c: char| !c.is_whitespace()))(input)
}

fn word_end(input: &str) -> IResult<&str, ()> {
    not(satisfy(|c: char| c.is_alphanumeric() || c == '_'))(input)
}

fn operator(input: &str) -> IResult<&str, Operator> {
    alt((
        value(Operator::Gte, tag(">=")),
        value(Operator::Lte, tag("<=")),
        value(Operator::Ne, tag("<>")),
        value(Operator::Ne, tag("!=")),
        value(Operator::Eq, tag("=")),
        value(Operator::Lt, tag("<")),
        value(Operator::Gt, tag(">")),
        value(Operator::ILike, terminated(tag_no_case("ilike"), word_end)),
        value(Operator::Like, terminated(tag_no_case("like"), word_end)),
    ))(input)
}

fn sort_order(input: &str) -> IResult<&str, SortOrder> {
    terminated(
        alt((
            value(SortOrder::Asc, tag_no_case("asc")),
            value(SortOrder::Desc, tag_no_case("desc")),
        )),
        word_end,
    )(input)
}

fn connector(input: &str) -> IResult<&str, Connector> {
    delimited(
        multispace1,
        alt((
            value(Connector::And, tag_no_case("and")),
            value(Connector::Or, tag_no_case("or")),
        )),
        multispace1,
    )(input)
}

fn condition(input: &str) -> IResult<&str, Condition> {
    map(
        tuple((qualified_identifier, multispace0, operator, multispace0, literal)),
        |(column, _, op, _, value)| Condition::new(column, op, value),
    )(input)
}

fn filter(input: &str) -> IResult<&str, Filter> {
    map(
        pair(condition, many0(pair(connector, condition))),
        |(first, rest)| {
            let mut filter = Filter::from(first);
            for (connector, condition) in rest {
                filter.push(connector, condition);
            }
            filter
        },
    )(input)
}

/// Parse a literal value.
fn literal(input: &str) -> IResult<&str, Value> {
    alt((
        value(Value::Null, terminated(tag_no_case("null"), token_end)),
        value(Value::Bool(true), terminated(tag_no_case("true"), token_end)),
        value(Value::Bool(false), terminated(tag_no_case("false"), token_end)),
        timestamp,
        date,
        time,
        number,
        quoted_string,
        bare_word,
    ))(input)
}

fn digits(n: usize) -> impl FnMut(&str) -> IResult<&str, &str> {
    move |input: &str| take_while_m_n(n, n, |c: char| c.is_ascii_digit())(input)
}

fn date_text(input: &str) -> IResult<&str, &str> {
    recognize(tuple((digits(4), char('-'), digits(2), char('-'), digits(2))))(input)
}

fn time_text(input: &str) -> IResult<&str, &str> {
    recognize(tuple((
        digits(2),
        char(':'),
        digits(2),
        char(':'),
        digits(2),
        opt(pair(char('.'), digit1)),
    )))(input)
}

fn timestamp(input: &str) -> IResult<&str, Value> {
    map_res(
        terminated(
            recognize(tuple((date_text, alt((char('T'), char(' '))), time_text))),
            token_end,
        ),
        |s: &str| {
            NaiveDateTime::parse_from_str(&s.replacen('T', " ", 1), "%Y-%m-%d %H:%M:%S%.f")
                .map(Value::Timestamp)
        },
    )(input)
}

fn date(input: &str) -> IResult<&str, Value> {
    map_res(terminated(date_text, token_end), |s: &str| {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").map(Value::Date)
    })(input)
}

fn time(input: &str) -> IResult<&str, Value> {
    map_res(terminated(time_text, token_end), |s: &str| {
        NaiveTime::parse_from_str(s, "%H:%M:%S%.f").map(Value::Time)
    })(input)
}

fn number(input: &str) -> IResult<&str, Value> {
    map_res(
        terminated(
            recognize(tuple((opt(char('-')), digit1, opt(pair(char('.'), digit1))))),
            token_end,
        ),
        |s: &str| -> Result<Value, String> {
            if s.contains('.') {
                s.parse::<f64>().map(Value::Float).map_err(|e| e.to_string())
            } else {
                s.parse::<i64>().map(Value::Int).map_err(|e| e.to_string())
            }
        },
    )(input)
}

/// `'text'`, with `''` standing for a single quote.
fn quoted_string(input: &str) -> IResult<&str, Value> {
    map(
        delimited(
            char('\''),
            many0(alt((value('\'', tag("''")), none_of("'")))),
            char('\''),
        ),
        |chars: Vec<char>| Value::Text(chars.into_iter().collect()),
    )(input)
}

fn bare_word(input: &str) -> IResult<&str, Value> {
    map(
        recognize(pair(
            satisfy(|c: char| c != '\'' && !c.is_whitespace()),
            take_while(|c: char| !c.is_whitespace()),
        )),
        |s: &str| Value::Text(s.to_string()),
    )(input)
}
