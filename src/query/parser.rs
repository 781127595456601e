use super::{MatchQuery, Predicate, ReturnItem, Statement};
use crate::error::{GriddleError, Result};
use crate::types::{EntityKind, IndexIdentity, PropertyValue};
use nom::{
    branch::alt,
    bytes::complete::{is_not, tag_no_case, take_while, take_while1},
    character::complete::{char, digit1, multispace0, satisfy},
    combinator::{all_consuming, map, map_res, not, opt, recognize, value},
    multi::separated_list1,
    sequence::{delimited, pair, preceded, separated_pair, terminated, tuple},
    IResult,
};

/// Parse one statement. Keywords are case-insensitive; a trailing `;` is
/// allowed.
pub fn parse(input: &str) -> Result<Statement> {
    let (_, raw) = all_consuming(terminated(
        alt((create_index, drop_index, match_statement, call)),
        pair(opt(char(';')), multispace0),
    ))(input.trim_start())?;

    match raw {
        RawStatement::Ready(stmt) => Ok(stmt),
        RawStatement::Match(m) => m.validate().map(Statement::Match),
    }
}

enum RawStatement<'a> {
    Ready(Statement),
    Match(RawMatch<'a>),
}

struct RawMatch<'a> {
    variable: &'a str,
    label: &'a str,
    hint: Option<(&'a str, IndexIdentity)>,
    predicates: Vec<((&'a str, &'a str), PropertyValue)>,
    returns: Vec<(&'a str, Option<&'a str>)>,
}

impl RawMatch<'_> {
    fn validate(self) -> Result<MatchQuery> {
        let unknown = |v: &str| {
            GriddleError::InvalidQuery(format!(
                "Variable `{}` not defined, expected `{}`",
                v, self.variable
            ))
        };

        let index_hint = match self.hint {
            Some((var, identity)) => {
                if var != self.variable {
                    return Err(unknown(var));
                }
                if identity.kind != EntityKind::Node || identity.token != self.label {
                    return Err(GriddleError::InvalidQuery(format!(
                        "Index hint {} does not cover label :{}",
                        identity, self.label
                    )));
                }
                Some(identity)
            }
            None => None,
        };

        let mut predicates = Vec::with_capacity(self.predicates.len());
        for ((var, property), value) in self.predicates {
            if var != self.variable {
                return Err(unknown(var));
            }
            predicates.push(Predicate {
                property: property.to_string(),
                value,
            });
        }

        let mut returns = Vec::with_capacity(self.returns.len());
        for (var, property) in self.returns {
            if var != self.variable {
                return Err(unknown(var));
            }
            returns.push(match property {
                Some(p) => ReturnItem::Property(p.to_string()),
                None => ReturnItem::Entity,
            });
        }

        Ok(MatchQuery {
            variable: self.variable.to_string(),
            label: self.label.to_string(),
            index_hint,
            predicates,
            returns,
        })
    }
}

fn ws<'a, O, F>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    delimited(multispace0, inner, multispace0)
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Case-insensitive keyword that is not the prefix of a longer word.
fn keyword<'a>(kw: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    ws(terminated(tag_no_case(kw), not(satisfy(is_ident_char))))
}

fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(is_ident_char),
    ))(input)
}

fn property_list(input: &str) -> IResult<&str, Vec<&str>> {
    delimited(
        ws(char('(')),
        separated_list1(ws(char(',')), identifier),
        ws(char(')')),
    )(input)
}

fn identity(kind: EntityKind, token: &str, properties: Vec<&str>) -> IndexIdentity {
    IndexIdentity {
        kind,
        token: token.to_string(),
        properties: properties.into_iter().map(str::to_string).collect(),
    }
}

/// `:Label(p, ..)` for node indexes, `:[TYPE](p, ..)` for relationship indexes.
fn index_target(input: &str) -> IResult<&str, IndexIdentity> {
    preceded(
        ws(char(':')),
        alt((
            map(
                pair(delimited(char('['), ws(identifier), char(']')), property_list),
                |(token, props)| identity(EntityKind::Relationship, token, props),
            ),
            map(pair(identifier, property_list), |(token, props)| {
                identity(EntityKind::Node, token, props)
            }),
        )),
    )(input)
}

fn create_index(input: &str) -> IResult<&str, RawStatement<'_>> {
    map(
        preceded(
            tuple((keyword("CREATE"), keyword("INDEX"), keyword("ON"))),
            index_target,
        ),
        |id| RawStatement::Ready(Statement::CreateIndex(id)),
    )(input)
}

fn drop_index(input: &str) -> IResult<&str, RawStatement<'_>> {
    map(
        preceded(
            tuple((keyword("DROP"), keyword("INDEX"), keyword("ON"))),
            index_target,
        ),
        |id| RawStatement::Ready(Statement::DropIndex(id)),
    )(input)
}

fn single_quoted(input: &str) -> IResult<&str, PropertyValue> {
    map(delimited(char('\''), opt(is_not("'")), char('\'')), |s: Option<&str>| {
        PropertyValue::Text(s.unwrap_or_default().to_string())
    })(input)
}

fn double_quoted(input: &str) -> IResult<&str, PropertyValue> {
    map(delimited(char('"'), opt(is_not("\"")), char('"')), |s: Option<&str>| {
        PropertyValue::Text(s.unwrap_or_default().to_string())
    })(input)
}

fn literal(input: &str) -> IResult<&str, PropertyValue> {
    alt((
        single_quoted,
        double_quoted,
        map_res(recognize(pair(opt(char('-')), digit1)), |s: &str| {
            s.parse::<i64>().map(PropertyValue::Integer)
        }),
        value(PropertyValue::Bool(true), keyword("true")),
        value(PropertyValue::Bool(false), keyword("false")),
    ))(input)
}

/// `n.firstname`
fn property_access(input: &str) -> IResult<&str, (&str, &str)> {
    separated_pair(identifier, char('.'), identifier)(input)
}

fn node_pattern(input: &str) -> IResult<&str, (&str, &str)> {
    delimited(
        ws(char('(')),
        separated_pair(ws(identifier), char(':'), ws(identifier)),
        ws(char(')')),
    )(input)
}

fn index_hint(input: &str) -> IResult<&str, (&str, IndexIdentity)> {
    preceded(
        pair(keyword("USING"), keyword("INDEX")),
        pair(ws(identifier), index_target),
    )(input)
}

fn predicate(input: &str) -> IResult<&str, ((&str, &str), PropertyValue)> {
    separated_pair(ws(property_access), char('='), ws(literal))(input)
}

fn return_item(input: &str) -> IResult<&str, (&str, Option<&str>)> {
    ws(alt((
        map(property_access, |(var, p)| (var, Some(p))),
        map(identifier, |var| (var, None)),
    )))(input)
}

fn match_statement(input: &str) -> IResult<&str, RawStatement<'_>> {
    let (input, _) = keyword("MATCH")(input)?;
    let (input, (variable, label)) = node_pattern(input)?;
    let (input, hint) = opt(index_hint)(input)?;
    let (input, predicates) = opt(preceded(
        keyword("WHERE"),
        separated_list1(keyword("AND"), predicate),
    ))(input)?;
    let (input, returns) = preceded(
        keyword("RETURN"),
        separated_list1(ws(char(',')), return_item),
    )(input)?;

    Ok((
        input,
        RawStatement::Match(RawMatch {
            variable,
            label,
            hint,
            predicates: predicates.unwrap_or_default(),
            returns,
        }),
    ))
}

fn procedure_name(input: &str) -> IResult<&str, &str> {
    recognize(separated_list1(char('.'), identifier))(input)
}

fn call(input: &str) -> IResult<&str, RawStatement<'_>> {
    map(
        preceded(
            keyword("CALL"),
            terminated(ws(procedure_name), opt(pair(ws(char('(')), ws(char(')'))))),
        ),
        |name| {
            RawStatement::Ready(Statement::Call {
                procedure: name.to_string(),
            })
        },
    )(input)
}
