use crate::engine::types::ParamSet;
use thiserror::Error;

/// 約束表達式解析錯誤
#[derive(Error, Debug)]
pub enum ConstraintError {
    #[error("無效的約束記號 '{0}'")]
    InvalidToken(String),

    #[error("約束表達式不完整: {0}")]
    Incomplete(String),

    #[error("預期比較運算符，得到 '{0}'")]
    ExpectedOperator(String),
}

/// 布林約束表達式
///
/// 語法：以 `and`/`or`（別名 `&&`/`||`）連接的比較式，運算元為參數名
/// 或數字字面量。例如 `fast<slow and fast>2`。
///
/// 求值失敗（未知參數等）時視為「約束滿足」：成本模型偏好過度納入，
/// 而不是無聲丟掉有效的搜索空間。
#[derive(Debug, Clone)]
pub struct Constraint {
    expr: Option<Expr>,
    raw: String,
}

impl Constraint {
    /// 解析約束；空白字串表示接受一切
    pub fn parse(raw: &str) -> Result<Self, ConstraintError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(Self::accept_all());
        }
        let tokens = tokenize(trimmed)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_or()?;
        if parser.pos != parser.tokens.len() {
            return Err(ConstraintError::Incomplete(trimmed.to_string()));
        }
        Ok(Self {
            expr: Some(expr),
            raw: trimmed.to_string(),
        })
    }

    /// 無條件接受所有參數組的約束
    pub fn accept_all() -> Self {
        Self {
            expr: None,
            raw: String::new(),
        }
    }

    pub fn is_trivial(&self) -> bool {
        self.expr.is_none()
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// 參數組是否滿足約束；求值失敗一律回傳 true
    pub fn satisfied(&self, params: &ParamSet) -> bool {
        match &self.expr {
            None => true,
            Some(expr) => expr.eval(params).unwrap_or(true),
        }
    }
}

#[derive(Debug, Clone)]
enum Expr {
    Or(Vec<Expr>),
    And(Vec<Expr>),
    Cmp {
        lhs: Operand,
        op: CmpOp,
        rhs: Operand,
    },
}

#[derive(Debug, Clone)]
enum Operand {
    Param(String),
    Literal(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Expr {
    /// 求值；未知參數回傳 None（由呼叫端決定視為滿足）
    fn eval(&self, params: &ParamSet) -> Option<bool> {
        match self {
            Expr::Or(parts) => {
                for p in parts {
                    if p.eval(params)? {
                        return Some(true);
                    }
                }
                Some(false)
            }
            Expr::And(parts) => {
                for p in parts {
                    if !p.eval(params)? {
                        return Some(false);
                    }
                }
                Some(true)
            }
            Expr::Cmp { lhs, op, rhs } => {
                let l = lhs.value(params)?;
                let r = rhs.value(params)?;
                Some(match op {
                    CmpOp::Lt => l < r,
                    CmpOp::Le => l <= r,
                    CmpOp::Gt => l > r,
                    CmpOp::Ge => l >= r,
                    CmpOp::Eq => l == r,
                    CmpOp::Ne => l != r,
                })
            }
        }
    }
}

impl Operand {
    fn value(&self, params: &ParamSet) -> Option<f64> {
        match self {
            Operand::Literal(v) => Some(*v),
            Operand::Param(name) => params.get(name).and_then(|v| v.as_f64()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Op(CmpOp),
    And,
    Or,
}

fn tokenize(input: &str) -> Result<Vec<Token>, ConstraintError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            match word.to_lowercase().as_str() {
                "and" => tokens.push(Token::And),
                "or" => tokens.push(Token::Or),
                _ => tokens.push(Token::Ident(word)),
            }
        } else if c.is_ascii_digit()
            || (c == '-' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit()))
        {
            let start = i;
            i += 1;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            let value = text
                .parse::<f64>()
                .map_err(|_| ConstraintError::InvalidToken(text.clone()))?;
            tokens.push(Token::Number(value));
        } else {
            let two: String = chars[i..(i + 2).min(chars.len())].iter().collect();
            match two.as_str() {
                "<=" => {
                    tokens.push(Token::Op(CmpOp::Le));
                    i += 2;
                }
                ">=" => {
                    tokens.push(Token::Op(CmpOp::Ge));
                    i += 2;
                }
                "==" => {
                    tokens.push(Token::Op(CmpOp::Eq));
                    i += 2;
                }
                "!=" => {
                    tokens.push(Token::Op(CmpOp::Ne));
                    i += 2;
                }
                "&&" => {
                    tokens.push(Token::And);
                    i += 2;
                }
                "||" => {
                    tokens.push(Token::Or);
                    i += 2;
                }
                _ => match c {
                    '<' => {
                        tokens.push(Token::Op(CmpOp::Lt));
                        i += 1;
                    }
                    '>' => {
                        tokens.push(Token::Op(CmpOp::Gt));
                        i += 1;
                    }
                    '=' => {
                        // 寬鬆接受單一等號
                        tokens.push(Token::Op(CmpOp::Eq));
                        i += 1;
                    }
                    other => return Err(ConstraintError::InvalidToken(other.to_string())),
                },
            }
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn parse_or(&mut self) -> Result<Expr, ConstraintError> {
        let mut parts = vec![self.parse_and()?];
        while matches!(self.peek(), Some(Token::Or)) {
            self.pos += 1;
            parts.push(self.parse_and()?);
        }
        if parts.len() == 1 {
            Ok(parts.pop().unwrap())
        } else {
            Ok(Expr::Or(parts))
        }
    }

    fn parse_and(&mut self) -> Result<Expr, ConstraintError> {
        let mut parts = vec![self.parse_cmp()?];
        while matches!(self.peek(), Some(Token::And)) {
            self.pos += 1;
            parts.push(self.parse_cmp()?);
        }
        if parts.len() == 1 {
            Ok(parts.pop().unwrap())
        } else {
            Ok(Expr::And(parts))
        }
    }

    fn parse_cmp(&mut self) -> Result<Expr, ConstraintError> {
        let lhs = self.parse_operand()?;
        let op = match self.next() {
            Some(Token::Op(op)) => op,
            Some(other) => return Err(ConstraintError::ExpectedOperator(format!("{other:?}"))),
            None => return Err(ConstraintError::Incomplete("缺少比較運算符".to_string())),
        };
        let rhs = self.parse_operand()?;
        Ok(Expr::Cmp { lhs, op, rhs })
    }

    fn parse_operand(&mut self) -> Result<Operand, ConstraintError> {
        match self.next() {
            Some(Token::Ident(name)) => Ok(Operand::Param(name)),
            Some(Token::Number(value)) => Ok(Operand::Literal(value)),
            Some(other) => Err(ConstraintError::InvalidToken(format!("{other:?}"))),
            None => Err(ConstraintError::Incomplete("缺少運算元".to_string())),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }
}
