//! Expression and statement parser producing the template syntax tree.

use serde_json::Value;

use super::lexer::{Segment, Token, segments, tokenize};

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Name(String),
    List(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
    Attribute { target: Box<Expr>, name: String },
    Index { target: Box<Expr>, index: Box<Expr> },
    Call { target: Box<Expr>, args: Arguments },
    Filter { target: Box<Expr>, name: String, args: Arguments },
    Test { target: Box<Expr>, name: String, negated: bool, args: Arguments },
    Negate(Box<Expr>),
    Not(Box<Expr>),
    Binary { op: BinaryOp, left: Box<Expr>, right: Box<Expr> },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Conditional { condition: Box<Expr>, then: Box<Expr>, otherwise: Option<Box<Expr>> },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments {
    pub positional: Vec<Expr>,
    pub keyword: Vec<(String, Expr)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    FloorDivide,
    Modulo,
    Concat,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    In,
    NotIn,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Text(String),
    Output(Expr),
    If {
        branches: Vec<(Expr, Vec<Node>)>,
        otherwise: Vec<Node>,
    },
    For {
        item: String,
        value: Option<String>,
        iterable: Expr,
        body: Vec<Node>,
        otherwise: Vec<Node>,
    },
    Set {
        name: String,
        value: Expr,
    },
}

/// Parsed template.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub nodes: Vec<Node>,
}

impl Template {
    /// The expression when the template is exactly one `${{ }}` and nothing else.
    pub fn single_expression(&self) -> Option<&Expr> {
        match self.nodes.as_slice() {
            [Node::Output(expression)] => Some(expression),
            _ => None,
        }
    }

    /// True when the template contains nothing but literal text.
    pub fn is_static(&self) -> bool {
        self.nodes.iter().all(|node| matches!(node, Node::Text(_)))
    }
}

pub fn parse_template(source: &str) -> Result<Template, String> {
    let items = flatten(source)?;
    let mut parser = BlockParser { items, position: 0 };
    let (nodes, terminator) = parser.parse_block(&[])?;
    if let Some(keyword) = terminator {
        return Err(format!("unexpected '{keyword}'"));
    }
    Ok(Template { nodes })
}

pub fn parse_expression(source: &str) -> Result<Expr, String> {
    let mut parser = ExpressionParser::new(tokenize(source)?);
    let expression = parser.parse_expression()?;
    parser.expect_end()?;
    Ok(expression)
}

enum Item {
    Text(String),
    Expression(String),
    Statement(String),
}

/// Applies whitespace control and drops comments.
fn flatten(source: &str) -> Result<Vec<Item>, String> {
    let segments = segments(source);
    let trims_after = |segment: &Segment<'_>| {
        matches!(
            segment,
            Segment::Statement { trim_after: true, .. } | Segment::Comment { trim_after: true, .. }
        )
    };
    let trims_before = |segment: &Segment<'_>| {
        matches!(
            segment,
            Segment::Statement { trim_before: true, .. } | Segment::Comment { trim_before: true, .. }
        )
    };

    let mut items = Vec::with_capacity(segments.len());
    for (index, segment) in segments.iter().enumerate() {
        match segment {
            Segment::Text(text) => {
                let mut text: &str = text;
                if index > 0 && trims_after(&segments[index - 1]) {
                    text = text.trim_start();
                }
                if segments.get(index + 1).is_some_and(trims_before) {
                    text = text.trim_end();
                }
                if !text.is_empty() {
                    items.push(Item::Text(text.to_string()));
                }
            }
            Segment::Expression(body) => items.push(Item::Expression(body.to_string())),
            Segment::Statement { body, .. } => items.push(Item::Statement(body.to_string())),
            Segment::Comment { .. } => {}
        }
    }
    Ok(items)
}

struct BlockParser {
    items: Vec<Item>,
    position: usize,
}

impl BlockParser {
    /// Parses nodes until one of `terminators` is met. Returns the nodes and the
    /// terminating statement (keyword plus the tokens following it).
    fn parse_block(&mut self, terminators: &[&str]) -> Result<(Vec<Node>, Option<String>), String> {
        let mut nodes = Vec::new();
        while self.position < self.items.len() {
            let index = self.position;
            self.position += 1;
            match &self.items[index] {
                Item::Text(text) => nodes.push(Node::Text(text.clone())),
                Item::Expression(body) => nodes.push(Node::Output(parse_expression(body)?)),
                Item::Statement(body) => {
                    let body = body.clone();
                    let keyword = body.split_whitespace().next().unwrap_or_default().to_string();
                    if terminators.contains(&keyword.as_str()) {
                        return Ok((nodes, Some(body)));
                    }
                    nodes.push(self.parse_statement(&keyword, &body)?);
                }
            }
        }
        Ok((nodes, None))
    }

    fn parse_statement(&mut self, keyword: &str, body: &str) -> Result<Node, String> {
        let rest = body[keyword.len()..].trim();
        match keyword {
            "if" => self.parse_if(rest),
            "for" => self.parse_for(rest),
            "set" => {
                let (name, value) = rest.split_once('=').ok_or_else(|| format!("expected '=' in '{body}'"))?;
                let name = name.trim();
                if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
                    return Err(format!("invalid variable name '{name}'"));
                }
                Ok(Node::Set {
                    name: name.to_string(),
                    value: parse_expression(value)?,
                })
            }
            other => Err(format!("unknown statement '{other}'")),
        }
    }

    fn parse_if(&mut self, condition: &str) -> Result<Node, String> {
        let mut branches = Vec::new();
        let mut condition = parse_expression(condition)?;
        loop {
            let (body, terminator) = self.parse_block(&["elif", "else", "endif"])?;
            let terminator = terminator.ok_or("missing 'endif'")?;
            branches.push((condition, body));
            match terminator.split_whitespace().next().unwrap_or_default() {
                "elif" => condition = parse_expression(terminator["elif".len()..].trim())?,
                "else" => {
                    let (otherwise, end) = self.parse_block(&["endif"])?;
                    end.ok_or("missing 'endif'")?;
                    return Ok(Node::If { branches, otherwise });
                }
                _ => {
                    return Ok(Node::If {
                        branches,
                        otherwise: Vec::new(),
                    });
                }
            }
        }
    }

    fn parse_for(&mut self, header: &str) -> Result<Node, String> {
        let mut parser = ExpressionParser::new(tokenize(header)?);
        let item = parser.expect_name()?;
        let value = if parser.eat_symbol(",") { Some(parser.expect_name()?) } else { None };
        if !parser.eat_keyword("in") {
            return Err("expected 'in' in for loop".to_string());
        }
        let iterable = parser.parse_expression()?;
        parser.expect_end()?;

        let (body, terminator) = self.parse_block(&["else", "endfor"])?;
        let terminator = terminator.ok_or("missing 'endfor'")?;
        let otherwise = if terminator.starts_with("else") {
            let (otherwise, end) = self.parse_block(&["endfor"])?;
            end.ok_or("missing 'endfor'")?;
            otherwise
        } else {
            Vec::new()
        };
        Ok(Node::For {
            item,
            value,
            iterable,
            body,
            otherwise,
        })
    }
}

struct ExpressionParser {
    tokens: Vec<Token>,
    position: usize,
}

impl ExpressionParser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, position: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.position + offset)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        self.position += 1;
        token
    }

    fn is_symbol(&self, symbol: &str) -> bool {
        matches!(self.peek(), Some(Token::Symbol(candidate)) if *candidate == symbol)
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Name(name)) if name == keyword)
    }

    fn eat_symbol(&mut self, symbol: &str) -> bool {
        if self.is_symbol(symbol) {
            self.position += 1;
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.is_keyword(keyword) {
            self.position += 1;
            true
        } else {
            false
        }
    }

    fn expect_symbol(&mut self, symbol: &str) -> Result<(), String> {
        if self.eat_symbol(symbol) {
            Ok(())
        } else {
            Err(format!("expected '{symbol}', found {}", self.describe_next()))
        }
    }

    fn expect_name(&mut self) -> Result<String, String> {
        match self.next() {
            Some(Token::Name(name)) => Ok(name),
            other => Err(format!("expected a name, found {}", describe(other.as_ref()))),
        }
    }

    fn expect_end(&self) -> Result<(), String> {
        match self.peek() {
            None => Ok(()),
            Some(token) => Err(format!("unexpected {}", describe(Some(token)))),
        }
    }

    fn describe_next(&self) -> String {
        describe(self.peek())
    }

    fn parse_expression(&mut self) -> Result<Expr, String> {
        let then = self.parse_or()?;
        if !self.eat_keyword("if") {
            return Ok(then);
        }
        let condition = self.parse_or()?;
        let otherwise = if self.eat_keyword("else") {
            Some(Box::new(self.parse_expression()?))
        } else {
            None
        };
        Ok(Expr::Conditional {
            condition: Box::new(condition),
            then: Box::new(then),
            otherwise,
        })
    }

    fn parse_or(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_and()?;
        while self.eat_keyword("or") {
            left = Expr::Or(Box::new(left), Box::new(self.parse_and()?));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_not()?;
        while self.eat_keyword("and") {
            left = Expr::And(Box::new(left), Box::new(self.parse_not()?));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, String> {
        if self.eat_keyword("not") {
            return Ok(Expr::Not(Box::new(self.parse_not()?)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_concat()?;
        loop {
            let (op, width) = match self.peek() {
                Some(Token::Symbol("==")) => (BinaryOp::Equal, 1),
                Some(Token::Symbol("!=")) => (BinaryOp::NotEqual, 1),
                Some(Token::Symbol("<")) => (BinaryOp::Less, 1),
                Some(Token::Symbol("<=")) => (BinaryOp::LessEqual, 1),
                Some(Token::Symbol(">")) => (BinaryOp::Greater, 1),
                Some(Token::Symbol(">=")) => (BinaryOp::GreaterEqual, 1),
                Some(Token::Name(name)) if name == "in" => (BinaryOp::In, 1),
                Some(Token::Name(name)) if name == "not" && matches!(self.peek_at(1), Some(Token::Name(next)) if next == "in") => {
                    (BinaryOp::NotIn, 2)
                }
                _ => return Ok(left),
            };
            self.position += width;
            let right = self.parse_concat()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn parse_concat(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_additive()?;
        while self.eat_symbol("~") {
            let right = self.parse_additive()?;
            left = binary(BinaryOp::Concat, left, right);
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = if self.eat_symbol("+") {
                BinaryOp::Add
            } else if self.eat_symbol("-") {
                BinaryOp::Subtract
            } else {
                return Ok(left);
            };
            let right = self.parse_multiplicative()?;
            left = binary(op, left, right);
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_unary()?;
        loop {
            let op = if self.eat_symbol("*") {
                BinaryOp::Multiply
            } else if self.eat_symbol("//") {
                BinaryOp::FloorDivide
            } else if self.eat_symbol("/") {
                BinaryOp::Divide
            } else if self.eat_symbol("%") {
                BinaryOp::Modulo
            } else {
                return Ok(left);
            };
            let right = self.parse_unary()?;
            left = binary(op, left, right);
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, String> {
        if self.eat_symbol("-") {
            return Ok(Expr::Negate(Box::new(self.parse_unary()?)));
        }
        if self.eat_symbol("+") {
            return self.parse_unary();
        }
        self.parse_filtered()
    }

    /// Postfix access followed by any number of `| filter` and `is test` suffixes.
    fn parse_filtered(&mut self) -> Result<Expr, String> {
        let mut expression = self.parse_postfix()?;
        loop {
            if self.eat_symbol("|") {
                let name = self.expect_name()?;
                let args = if self.eat_symbol("(") { self.parse_arguments()? } else { Arguments::default() };
                expression = Expr::Filter {
                    target: Box::new(expression),
                    name,
                    args,
                };
            } else if self.eat_keyword("is") {
                let negated = self.eat_keyword("not");
                let name = self.expect_name()?;
                let args = if self.eat_symbol("(") { self.parse_arguments()? } else { Arguments::default() };
                expression = Expr::Test {
                    target: Box::new(expression),
                    name,
                    negated,
                    args,
                };
            } else {
                return Ok(expression);
            }
        }
    }

    fn parse_postfix(&mut self) -> Result<Expr, String> {
        let mut expression = self.parse_primary()?;
        loop {
            if self.eat_symbol(".") {
                let name = match self.next() {
                    Some(Token::Name(name)) => name,
                    Some(Token::Int(index)) => {
                        expression = Expr::Index {
                            target: Box::new(expression),
                            index: Box::new(Expr::Literal(Value::from(index))),
                        };
                        continue;
                    }
                    other => return Err(format!("expected an attribute name, found {}", describe(other.as_ref()))),
                };
                expression = Expr::Attribute {
                    target: Box::new(expression),
                    name,
                };
            } else if self.eat_symbol("[") {
                let index = self.parse_expression()?;
                self.expect_symbol("]")?;
                expression = Expr::Index {
                    target: Box::new(expression),
                    index: Box::new(index),
                };
            } else if self.eat_symbol("(") {
                let args = self.parse_arguments()?;
                expression = Expr::Call {
                    target: Box::new(expression),
                    args,
                };
            } else {
                return Ok(expression);
            }
        }
    }

    /// Parses call arguments after the opening parenthesis, consuming the closing one.
    fn parse_arguments(&mut self) -> Result<Arguments, String> {
        let mut args = Arguments::default();
        while !self.eat_symbol(")") {
            let is_keyword = matches!(self.peek(), Some(Token::Name(_))) && matches!(self.peek_at(1), Some(Token::Symbol("=")));
            if is_keyword {
                let name = self.expect_name()?;
                self.expect_symbol("=")?;
                args.keyword.push((name, self.parse_expression()?));
            } else {
                if !args.keyword.is_empty() {
                    return Err("positional argument follows keyword argument".to_string());
                }
                args.positional.push(self.parse_expression()?);
            }
            if !self.eat_symbol(",") {
                self.expect_symbol(")")?;
                break;
            }
        }
        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<Expr, String> {
        match self.next() {
            Some(Token::Str(text)) => {
                let mut literal = text;
                // adjacent string literals concatenate
                while let Some(Token::Str(next)) = self.peek() {
                    literal.push_str(next);
                    self.position += 1;
                }
                Ok(Expr::Literal(Value::String(literal)))
            }
            Some(Token::Int(number)) => Ok(Expr::Literal(Value::from(number))),
            Some(Token::Float(number)) => Ok(Expr::Literal(crate::values::float_value(number))),
            Some(Token::Name(name)) => Ok(match name.as_str() {
                "true" | "True" => Expr::Literal(Value::Bool(true)),
                "false" | "False" => Expr::Literal(Value::Bool(false)),
                "none" | "None" | "null" => Expr::Literal(Value::Null),
                _ => Expr::Name(name),
            }),
            Some(Token::Symbol("(")) => {
                let expression = self.parse_expression()?;
                self.expect_symbol(")")?;
                Ok(expression)
            }
            Some(Token::Symbol("[")) => {
                let mut items = Vec::new();
                while !self.eat_symbol("]") {
                    items.push(self.parse_expression()?);
                    if !self.eat_symbol(",") {
                        self.expect_symbol("]")?;
                        break;
                    }
                }
                Ok(Expr::List(items))
            }
            Some(Token::Symbol("{")) => {
                let mut entries = Vec::new();
                while !self.eat_symbol("}") {
                    let key = self.parse_expression()?;
                    self.expect_symbol(":")?;
                    entries.push((key, self.parse_expression()?));
                    if !self.eat_symbol(",") {
                        self.expect_symbol("}")?;
                        break;
                    }
                }
                Ok(Expr::Dict(entries))
            }
            other => Err(format!("unexpected {}", describe(other.as_ref()))),
        }
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn describe(token: Option<&Token>) -> String {
    match token {
        None => "end of expression".to_string(),
        Some(Token::Name(name)) => format!("'{name}'"),
        Some(Token::Str(text)) => format!("string '{text}'"),
        Some(Token::Int(number)) => format!("number {number}"),
        Some(Token::Float(number)) => format!("number {number}"),
        Some(Token::Symbol(symbol)) => format!("'{symbol}'"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(value: &str) -> Box<Expr> {
        Box::new(Expr::Name(value.into()))
    }

    #[test]
    fn parses_attribute_chain_with_filter() {
        let expression = parse_expression("context.items | join(', ')").unwrap();
        assert_eq!(
            expression,
            Expr::Filter {
                target: Box::new(Expr::Attribute {
                    target: name("context"),
                    name: "items".into()
                }),
                name: "join".into(),
                args: Arguments {
                    positional: vec![Expr::Literal(Value::from(", "))],
                    keyword: vec![],
                },
            }
        );
    }

    #[test]
    fn parses_keyword_arguments() {
        let expression = parse_expression("utils.read_file(path, parse=true)").unwrap();
        let Expr::Call { args, .. } = expression else {
            panic!("expected a call");
        };
        assert_eq!(args.positional, vec![Expr::Name("path".into())]);
        assert_eq!(args.keyword, vec![("parse".into(), Expr::Literal(Value::Bool(true)))]);
    }

    #[test]
    fn respects_operator_precedence() {
        let expression = parse_expression("a or b and not c").unwrap();
        assert_eq!(
            expression,
            Expr::Or(name("a"), Box::new(Expr::And(name("b"), Box::new(Expr::Not(name("c"))))))
        );
    }

    #[test]
    fn parses_not_in_and_conditional() {
        let expression = parse_expression("'x' if a not in b else 'y'").unwrap();
        let Expr::Conditional { condition, otherwise, .. } = expression else {
            panic!("expected a conditional");
        };
        assert!(matches!(*condition, Expr::Binary { op: BinaryOp::NotIn, .. }));
        assert!(otherwise.is_some());
    }

    #[test]
    fn parses_blocks() {
        let template = parse_template("{% for x in items %}${{ x }}{% else %}none{% endfor %}").unwrap();
        let [Node::For { item, body, otherwise, .. }] = template.nodes.as_slice() else {
            panic!("expected a single for loop");
        };
        assert_eq!(item, "x");
        assert_eq!(body.len(), 1);
        assert_eq!(otherwise, &vec![Node::Text("none".into())]);
    }

    #[test]
    fn if_chains_collect_branches() {
        let template = parse_template("{% if a %}1{% elif b %}2{% else %}3{% endif %}").unwrap();
        let [Node::If { branches, otherwise }] = template.nodes.as_slice() else {
            panic!("expected a single if");
        };
        assert_eq!(branches.len(), 2);
        assert_eq!(otherwise, &vec![Node::Text("3".into())]);
    }

    #[test]
    fn whitespace_control_trims_neighbouring_text() {
        let template = parse_template("a  \n{%- if x -%}\n  b{% endif %}").unwrap();
        let [Node::Text(first), Node::If { branches, .. }] = template.nodes.as_slice() else {
            panic!("unexpected nodes: {:?}", template.nodes);
        };
        assert_eq!(first, "a");
        assert_eq!(branches[0].1, vec![Node::Text("b".into())]);
    }

    #[test]
    fn reports_unbalanced_blocks() {
        assert!(parse_template("{% if a %}x").is_err());
        assert!(parse_template("{% endif %}").is_err());
        assert!(parse_template("{% frobnicate %}").is_err());
        assert!(parse_expression("a +").is_err());
        assert!(parse_expression("a b").is_err());
    }

    #[test]
    fn single_expression_detection() {
        assert!(parse_template("${{ a }}").unwrap().single_expression().is_some());
        assert!(parse_template(" ${{ a }}").unwrap().single_expression().is_none());
        assert!(parse_template("plain").unwrap().is_static());
    }
}
