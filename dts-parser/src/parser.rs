//! nom combinator grammar for Device Tree Source.
//!
//! The grammar is schema-agnostic: it recognizes the DTS surface syntax
//! (nodes, labels, properties, references, directives) and leaves all
//! linking and semantic checks to the consumer.

use nom::{
    branch::alt,
    bytes::complete::{escaped, is_a, is_not, tag, take_until, take_while, take_while_m_n},
    character::complete::{alphanumeric1, anychar, char, digit1, hex_digit1, multispace1},
    combinator::{all_consuming, cut, map, map_res, not, opt, recognize, value, verify},
    multi::{many0, many1, separated_list1},
    sequence::{delimited, pair, preceded, terminated, tuple},
    Finish,
};
use nom_locate::LocatedSpan;

use crate::ast::*;
use crate::SyntaxError;

pub(crate) type Input<'a> = LocatedSpan<&'a str>;

type IResult<'a, T> = nom::IResult<Input<'a>, T>;

/// Parse a complete DTS file.
pub fn from_str(source: &str) -> Result<Dts<'_>, SyntaxError> {
    match all_consuming(dts_file)(Input::new(source)).finish() {
        Ok((_, dts)) => Ok(dts),
        Err(e) => Err(SyntaxError::at(&e.input)),
    }
}

/// Parse a bare sequence of node contents (properties, children,
/// directives), as found in an include fragment spliced into a node body.
pub fn contents_from_str(source: &str) -> Result<Vec<NodeItem<'_>>, SyntaxError> {
    match all_consuming(terminated(node_items, ws))(Input::new(source)).finish() {
        Ok((_, items)) => Ok(items),
        Err(e) => Err(SyntaxError::at(&e.input)),
    }
}

fn dts_file(input: Input) -> IResult<Dts> {
    enum Item<'s> {
        Version,
        MemReserve((u64, u64)),
        Top(TopLevel<'s>),
    }

    map(
        terminated(
            many0(alt((
                map(version_directive, |_| Item::Version),
                map(memreserve, Item::MemReserve),
                map(include_directive, |i| Item::Top(TopLevel::Include(i))),
                map(top_level_delete_node, |n| Item::Top(TopLevel::DeleteNode(n))),
                map(top_level_omit, |n| Item::Top(TopLevel::OmitIfNoRef(n))),
                map(root_node, |n| Item::Top(TopLevel::Root(n))),
                map(override_node, |n| Item::Top(TopLevel::Override(n))),
            ))),
            ws,
        ),
        |items| {
            let mut dts = Dts::default();
            for item in items {
                match item {
                    Item::Version => dts.version = Some(DtsVersion::V1),
                    Item::MemReserve(m) => dts.memreserves.push(m),
                    Item::Top(t) => dts.items.push(t),
                }
            }
            dts
        },
    )(input)
}

fn version_directive(input: Input) -> IResult<()> {
    value((), terminated(keyword("/dts-v1/"), cut(sym(';'))))(input)
}

fn memreserve(input: Input) -> IResult<(u64, u64)> {
    delimited(
        keyword("/memreserve/"),
        cut(pair(lexeme(unsigned_literal), lexeme(unsigned_literal))),
        cut(sym(';')),
    )(input)
}

/// A top-level `/ { ... };` block.
fn root_node(input: Input) -> IResult<Node> {
    map(
        tuple((sym('/'), node_body, cut(sym(';')))),
        |(_, items, _)| Node {
            id: NodeId::Name("/", None),
            items,
            ..Default::default()
        },
    )(input)
}

/// A top-level `&ref { ... };` override block.
fn override_node(input: Input) -> IResult<Node> {
    map(
        tuple((
            opt(keyword("/omit-if-no-ref/")),
            node_labels,
            reference,
            node_body,
            cut(sym(';')),
        )),
        |(omit, labels, r, items, _)| Node {
            id: NodeId::Ref(r),
            labels,
            omit_if_no_ref: omit.is_some(),
            items,
        },
    )(input)
}

/// A named node inside another node's body.
fn inner_node(input: Input) -> IResult<Node> {
    map(
        tuple((
            opt(keyword("/omit-if-no-ref/")),
            node_labels,
            node_name,
            node_body,
            cut(sym(';')),
        )),
        |(omit, labels, id, items, _)| Node {
            id,
            labels,
            omit_if_no_ref: omit.is_some(),
            items,
        },
    )(input)
}

fn node_body(input: Input) -> IResult<Vec<NodeItem>> {
    preceded(sym('{'), cut(terminated(node_items, sym('}'))))(input)
}

fn node_items(input: Input) -> IResult<Vec<NodeItem>> {
    many0(alt((
        map(inner_node, NodeItem::Child),
        map(include_directive, NodeItem::Include),
        map(property, NodeItem::Property),
        map(delete_property, NodeItem::DeleteProperty),
        map(node_level_delete_node, NodeItem::DeleteNode),
    )))(input)
}

fn node_labels(input: Input) -> IResult<Vec<&str>> {
    many0(terminated(node_label, sym(':')))(input)
}

fn node_label(input: Input) -> IResult<&str> {
    map(lexeme(node_label_str), |s: Input| *s.fragment())(input)
}

/// A node name with optional `@unit-address`.
fn node_name(input: Input) -> IResult<NodeId> {
    map(
        pair(
            lexeme(node_name_str),
            opt(preceded(char('@'), cut(node_name_str))),
        ),
        |(name, addr)| NodeId::Name(*name.fragment(), addr.map(|a| *a.fragment())),
    )(input)
}

/// A `&label` or `&{/full/path}` reference.
fn reference(input: Input) -> IResult<Reference> {
    preceded(
        lexeme(char('&')),
        cut(alt((
            map(node_label_str, |s: Input| Reference(*s.fragment())),
            map(
                delimited(char('{'), node_path, char('}')),
                |s: Input| Reference(*s.fragment()),
            ),
        ))),
    )(input)
}

fn property(input: Input) -> IResult<Property> {
    map(
        tuple((
            lexeme(prop_name_str),
            opt(preceded(sym('='), cut(prop_values))),
            cut(sym(';')),
        )),
        |(name, values, _)| Property {
            name: *name.fragment(),
            values,
        },
    )(input)
}

fn prop_values(input: Input) -> IResult<Vec<Value>> {
    separated_list1(
        sym(','),
        alt((
            prop_value_cells,
            prop_value_bytes,
            map(reference, Value::Ref),
            prop_value_str,
        )),
    )(input)
}

/// A cell array, optionally preceded by a `/bits/` width override.
fn prop_value_cells(input: Input) -> IResult<Value> {
    map(
        pair(
            opt(bits_prefix),
            preceded(sym('<'), cut(terminated(many0(cell), sym('>'))))),
        |(bits, cells)| Value::Cells(bits.unwrap_or(32), cells),
    )(input)
}

fn bits_prefix(input: Input) -> IResult<u32> {
    preceded(
        keyword("/bits/"),
        cut(verify(lexeme(unsigned_literal), |&n| {
            matches!(n, 8 | 16 | 32 | 64)
        })),
    )(input)
    .map(|(rest, n)| (rest, n as u32))
}

fn cell(input: Input) -> IResult<Cell> {
    alt((map(reference, Cell::Ref), map(cell_expr, Cell::Expr)))(input)
}

/// In cell position, dtc allows a bare literal or a parenthesized
/// expression; unparenthesized operators would be ambiguous with the
/// closing `>`.
fn cell_expr(input: Input) -> IResult<Expression> {
    lexeme(alt((paren_expr, map(int_literal, Expression::Lit))))(input)
}

fn prop_value_bytes(input: Input) -> IResult<Value> {
    map(
        preceded(sym('['), cut(terminated(many0(lexeme(hex_byte)), sym(']')))),
        Value::Bytes,
    )(input)
}

fn prop_value_str(input: Input) -> IResult<Value> {
    map(lexeme(string_literal), |s: Input| {
        Value::String(*s.fragment())
    })(input)
}

fn delete_property(input: Input) -> IResult<&str> {
    delimited(
        keyword("/delete-property/"),
        cut(map(lexeme(prop_name_str), |s: Input| *s.fragment())),
        cut(sym(';')),
    )(input)
}

/// Top-level deletions may name the target by reference; node-level ones
/// name a child directly.
fn top_level_delete_node(input: Input) -> IResult<NodeId> {
    delimited(
        keyword("/delete-node/"),
        cut(alt((map(reference, NodeId::Ref), node_name))),
        cut(sym(';')),
    )(input)
}

fn node_level_delete_node(input: Input) -> IResult<NodeId> {
    delimited(keyword("/delete-node/"), cut(node_name), cut(sym(';')))(input)
}

fn top_level_omit(input: Input) -> IResult<NodeId> {
    delimited(
        keyword("/omit-if-no-ref/"),
        cut(alt((map(reference, NodeId::Ref), node_name))),
        cut(sym(';')),
    )(input)
}

fn include_directive(input: Input) -> IResult<Include> {
    alt((include_dts, include_c))(input)
}

fn include_dts(input: Input) -> IResult<Include> {
    map(
        preceded(keyword("/include/"), cut(lexeme(quoted_path))),
        |p: Input| Include::Dts(*p.fragment()),
    )(input)
}

fn include_c(input: Input) -> IResult<Include> {
    map(
        preceded(
            keyword("#include"),
            cut(lexeme(alt((
                quoted_path,
                delimited(char('<'), is_not(">"), char('>')),
            )))),
        ),
        |p: Input| Include::C(*p.fragment()),
    )(input)
}

fn quoted_path(input: Input) -> IResult<Input> {
    delimited(char('"'), is_not("\""), char('"'))(input)
}

/* === Expressions === */

fn paren_expr(input: Input) -> IResult<Expression> {
    preceded(sym('('), cut(terminated(expr, sym(')'))))(input)
}

/// Full expression: the ternary operator has the lowest precedence.
fn expr(input: Input) -> IResult<Expression> {
    let (input, cond) = logical_or_expr(input)?;
    let (input, tail) = opt(pair(
        preceded(sym('?'), cut(expr)),
        preceded(cut(sym(':')), cut(expr)),
    ))(input)?;

    Ok((
        input,
        match tail {
            Some((then, else_)) => Expression::Ternary {
                cond: Box::new(cond),
                then: Box::new(then),
                else_: Box::new(else_),
            },
            None => cond,
        },
    ))
}

/// Left-fold a chain of `term (op term)*` into a binary expression tree.
fn binary_level<'a>(
    term: fn(Input<'a>) -> IResult<'a, Expression>,
    op: fn(Input<'a>) -> IResult<'a, BinaryOp>,
) -> impl FnMut(Input<'a>) -> IResult<'a, Expression> {
    move |input| {
        let (mut input, mut acc) = term(input)?;
        loop {
            match op(input) {
                Ok((rest, o)) => {
                    let (rest, rhs) = match term(rest) {
                        Ok(r) => r,
                        Err(nom::Err::Error(e)) => return Err(nom::Err::Failure(e)),
                        Err(e) => return Err(e),
                    };
                    acc = Expression::binary(acc, o, rhs);
                    input = rest;
                }
                Err(nom::Err::Error(_)) => return Ok((input, acc)),
                Err(e) => return Err(e),
            }
        }
    }
}

fn unary_expr(input: Input) -> IResult<Expression> {
    alt((
        map(pair(lexeme(unary_op), unary_expr), |(op, e)| {
            Expression::unary(op, e)
        }),
        atom,
    ))(input)
}

fn atom(input: Input) -> IResult<Expression> {
    lexeme(alt((paren_expr, map(int_literal, Expression::Lit))))(input)
}

fn unary_op(input: Input) -> IResult<UnaryOp> {
    alt((
        value(UnaryOp::Neg, char('-')),
        value(UnaryOp::BitNot, char('~')),
        value(UnaryOp::LogicalNot, terminated(char('!'), not(char('=')))),
    ))(input)
}

fn mul_expr(input: Input) -> IResult<Expression> {
    binary_level(unary_expr, mul_op)(input)
}

fn mul_op(input: Input) -> IResult<BinaryOp> {
    // Comments were already consumed as whitespace, so a leading `/` here
    // is a genuine division.
    lexeme(alt((
        value(BinaryOp::Mul, char('*')),
        value(BinaryOp::Div, char('/')),
        value(BinaryOp::Mod, char('%')),
    )))(input)
}

fn add_expr(input: Input) -> IResult<Expression> {
    binary_level(mul_expr, add_op)(input)
}

fn add_op(input: Input) -> IResult<BinaryOp> {
    lexeme(alt((
        value(BinaryOp::Add, char('+')),
        value(BinaryOp::Sub, char('-')),
    )))(input)
}

fn shift_expr(input: Input) -> IResult<Expression> {
    binary_level(add_expr, shift_op)(input)
}

fn shift_op(input: Input) -> IResult<BinaryOp> {
    lexeme(alt((
        value(BinaryOp::LShift, tag("<<")),
        value(BinaryOp::RShift, tag(">>")),
    )))(input)
}

fn cmp_expr(input: Input) -> IResult<Expression> {
    binary_level(shift_expr, cmp_op)(input)
}

fn cmp_op(input: Input) -> IResult<BinaryOp> {
    lexeme(alt((
        value(BinaryOp::Le, tag("<=")),
        value(BinaryOp::Ge, tag(">=")),
        value(BinaryOp::Lt, terminated(char('<'), not(char('<')))),
        value(BinaryOp::Gt, terminated(char('>'), not(char('>')))),
    )))(input)
}

fn eq_expr(input: Input) -> IResult<Expression> {
    binary_level(cmp_expr, eq_op)(input)
}

fn eq_op(input: Input) -> IResult<BinaryOp> {
    lexeme(alt((
        value(BinaryOp::Eq, tag("==")),
        value(BinaryOp::Neq, tag("!=")),
    )))(input)
}

fn bit_and_expr(input: Input) -> IResult<Expression> {
    binary_level(eq_expr, bit_and_op)(input)
}

fn bit_and_op(input: Input) -> IResult<BinaryOp> {
    lexeme(value(
        BinaryOp::BitAnd,
        terminated(char('&'), not(char('&'))),
    ))(input)
}

fn bit_xor_expr(input: Input) -> IResult<Expression> {
    binary_level(bit_and_expr, bit_xor_op)(input)
}

fn bit_xor_op(input: Input) -> IResult<BinaryOp> {
    lexeme(value(BinaryOp::BitXor, char('^')))(input)
}

fn bit_or_expr(input: Input) -> IResult<Expression> {
    binary_level(bit_xor_expr, bit_or_op)(input)
}

fn bit_or_op(input: Input) -> IResult<BinaryOp> {
    lexeme(value(BinaryOp::BitOr, terminated(char('|'), not(char('|')))))(input)
}

fn logical_and_expr(input: Input) -> IResult<Expression> {
    binary_level(bit_or_expr, logical_and_op)(input)
}

fn logical_and_op(input: Input) -> IResult<BinaryOp> {
    lexeme(value(BinaryOp::And, tag("&&")))(input)
}

fn logical_or_expr(input: Input) -> IResult<Expression> {
    binary_level(logical_and_expr, logical_or_op)(input)
}

fn logical_or_op(input: Input) -> IResult<BinaryOp> {
    lexeme(value(BinaryOp::Or, tag("||")))(input)
}

/* === Literals === */

fn int_literal(input: Input) -> IResult<i64> {
    alt((
        map(unsigned_hex, |n| n as i64),
        map(unsigned_dec, |n| n as i64),
        char_literal,
    ))(input)
}

fn unsigned_literal(input: Input) -> IResult<u64> {
    alt((unsigned_hex, unsigned_dec))(input)
}

fn unsigned_hex(input: Input) -> IResult<u64> {
    map_res(
        preceded(alt((tag("0x"), tag("0X"))), cut(hex_digit1)),
        |s: Input| u64::from_str_radix(s.fragment(), 16),
    )(input)
}

fn unsigned_dec(input: Input) -> IResult<u64> {
    map_res(digit1, |s: Input| s.fragment().parse::<u64>())(input)
}

fn char_literal(input: Input) -> IResult<i64> {
    map(
        delimited(char('\''), cut(anychar), cut(char('\''))),
        |c| c as i64,
    )(input)
}

fn hex_byte(input: Input) -> IResult<u8> {
    map_res(
        take_while_m_n(2, 2, |c: char| c.is_ascii_hexdigit()),
        |s: Input| u8::from_str_radix(s.fragment(), 16),
    )(input)
}

/// The raw text of a string literal, escapes included.
fn string_literal(input: Input) -> IResult<Input> {
    preceded(char('"'), cut(terminated(string_contents, char('"'))))(input)
}

fn string_contents(input: Input) -> IResult<Input> {
    recognize(opt(escaped(is_not("\"\\"), '\\', anychar)))(input)
}

/* === Identifier character sets === */

fn node_name_str(input: Input) -> IResult<Input> {
    recognize(many1(alt((alphanumeric1, is_a(",._+-")))))(input)
}

fn node_label_str(input: Input) -> IResult<Input> {
    recognize(many1(alt((alphanumeric1, is_a("_")))))(input)
}

fn prop_name_str(input: Input) -> IResult<Input> {
    recognize(many1(alt((alphanumeric1, is_a(",._+?#-")))))(input)
}

fn node_path(input: Input) -> IResult<Input> {
    recognize(preceded(
        char('/'),
        separated_list1(
            char('/'),
            recognize(pair(
                node_name_str,
                opt(preceded(char('@'), node_name_str)),
            )),
        ),
    ))(input)
}

/* === Lexical utilities === */

/// Run `f`, consuming surrounding whitespace and comments.
fn lexeme<'a, O, F>(f: F) -> impl FnMut(Input<'a>) -> IResult<'a, O>
where
    F: FnMut(Input<'a>) -> IResult<'a, O>,
{
    delimited(ws, f, ws)
}

fn sym<'a>(c: char) -> impl FnMut(Input<'a>) -> IResult<'a, char> {
    lexeme(char(c))
}

fn keyword<'a>(k: &'static str) -> impl FnMut(Input<'a>) -> IResult<'a, Input<'a>> {
    lexeme(tag(k))
}

fn ws(input: Input) -> IResult<Input> {
    recognize(many0(alt((multispace1, line_comment, block_comment))))(input)
}

fn line_comment(input: Input) -> IResult<Input> {
    recognize(preceded(
        tag("//"),
        take_while(|c: char| c != '\n' && c != '\r'),
    ))(input)
}

fn block_comment(input: Input) -> IResult<Input> {
    recognize(delimited(tag("/*"), take_until("*/"), tag("*/")))(input)
}

/* === Unit Tests === */
