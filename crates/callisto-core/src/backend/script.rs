//! Reference language backend: a small expression language parsed with syn.
//!
//! Submissions are sequences of Rust-flavored statements: `let` bindings,
//! `use math;` / `use text;` imports, and expressions over ints, floats,
//! bools, strings, and lists. The final expression without a trailing
//! semicolon becomes the submission's return value. Imports form the
//! state's compiled-unit reference set.

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use syn::spanned::Spanned;
use tokio_util::sync::CancellationToken;

use crate::error::{Diagnostic, Error, Result};
use crate::protocol::{CompletionItem, CompletionItemKind, SymbolDetail};
use crate::value::Value;

use super::LanguageBackend;

/// Importable modules and their functions.
const MODULES: &[&str] = &["math", "text"];

struct Builtin {
    name: &'static str,
    module: Option<&'static str>,
    signature: &'static str,
    arity: usize,
}

const BUILTINS: &[Builtin] = &[
    Builtin { name: "abs", module: None, signature: "abs(x) -> int | float", arity: 1 },
    Builtin { name: "min", module: None, signature: "min(a, b) -> int | float", arity: 2 },
    Builtin { name: "max", module: None, signature: "max(a, b) -> int | float", arity: 2 },
    Builtin { name: "len", module: None, signature: "len(value) -> int", arity: 1 },
    Builtin { name: "sqrt", module: Some("math"), signature: "sqrt(x) -> float", arity: 1 },
    Builtin { name: "pow", module: Some("math"), signature: "pow(base, exp) -> float", arity: 2 },
    Builtin { name: "floor", module: Some("math"), signature: "floor(x) -> int", arity: 1 },
    Builtin { name: "ceil", module: Some("math"), signature: "ceil(x) -> int", arity: 1 },
    Builtin { name: "upper", module: Some("text"), signature: "upper(s) -> str", arity: 1 },
    Builtin { name: "lower", module: Some("text"), signature: "lower(s) -> str", arity: 1 },
    Builtin { name: "trim", module: Some("text"), signature: "trim(s) -> str", arity: 1 },
];

/// Session state for the script backend.
///
/// Cloned cheaply per submission; the kernel commits the returned clone
/// only when evaluation succeeds.
#[derive(Debug, Clone, Default)]
pub struct ScriptState {
    bindings: FxHashMap<String, Value>,
    imports: Vec<String>,
    source: String,
    last_value: Option<Value>,
}

impl ScriptState {
    /// Look up a binding by name.
    pub fn binding(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)
    }

    /// Imported module names, in import order.
    pub fn imports(&self) -> &[String] {
        &self.imports
    }
}

/// Analysis workspace: the symbols reachable from a state's reference set.
#[derive(Debug, Clone)]
pub struct ScriptWorkspace {
    symbols: Vec<SymbolDetail>,
}

/// The syn-backed expression-language engine.
#[derive(Debug, Default)]
pub struct ScriptBackend;

impl ScriptBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl LanguageBackend for ScriptBackend {
    type State = ScriptState;
    type Workspace = ScriptWorkspace;

    async fn run(
        &self,
        code: &str,
        prior: Option<&ScriptState>,
        token: CancellationToken,
    ) -> Result<ScriptState> {
        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let stmts = parse_submission(code)?;

        let diagnostics = validate(&stmts);
        if !diagnostics.is_empty() {
            return Err(Error::Compilation { diagnostics });
        }

        let mut state = prior.cloned().unwrap_or_default();
        let mut last = None;
        let count = stmts.len();

        for (index, stmt) in stmts.iter().enumerate() {
            // Safe cancellation check point: an in-flight cancellation lands
            // between statements. The parsed `syn` AST is `!Send`, so this
            // loop stays synchronous to keep `run`'s future `Send` (the bus
            // spawns the submission worker onto a multi-threaded runtime).
            if token.is_cancelled() {
                return Err(Error::Cancelled);
            }

            match stmt {
                syn::Stmt::Local(local) => {
                    let syn::Pat::Ident(pat) = &local.pat else {
                        return Err(Error::Runtime("unsupported binding pattern".to_string()));
                    };
                    let Some(init) = &local.init else {
                        return Err(Error::Runtime("missing initializer".to_string()));
                    };
                    let value = eval_expr(&init.expr, &state.bindings, &state.imports)?;
                    state.bindings.insert(pat.ident.to_string(), value);
                    last = None;
                }
                syn::Stmt::Item(syn::Item::Use(item)) => {
                    if let Some(name) = use_module_name(&item.tree)
                        && !state.imports.contains(&name)
                    {
                        state.imports.push(name);
                    }
                    last = None;
                }
                syn::Stmt::Expr(expr, semi) => {
                    let value = eval_expr(expr, &state.bindings, &state.imports)?;
                    last = (semi.is_none() && index == count - 1).then_some(value);
                }
                _ => {
                    return Err(Error::Runtime("unsupported statement".to_string()));
                }
            }
        }

        state.last_value = last;
        if !state.source.is_empty() {
            state.source.push('\n');
        }
        state.source.push_str(code.trim_end());
        Ok(state)
    }

    fn is_complete_submission(&self, code: &str) -> bool {
        let trimmed = code.trim_end();
        if trimmed.trim().is_empty() {
            return true;
        }
        match scan_delimiters(code) {
            DelimiterScan::Open | DelimiterScan::UnterminatedString => return false,
            DelimiterScan::Balanced => {}
        }
        if ends_with_operator(trimmed) {
            return false;
        }
        match raw_parse(code) {
            Ok(_) => true,
            Err(err) => !err.to_string().contains("unexpected end of input"),
        }
    }

    fn has_return_value(&self, state: &ScriptState) -> bool {
        state.last_value.is_some()
    }

    fn return_value(&self, state: &ScriptState) -> Option<Value> {
        state.last_value.clone()
    }

    fn source_text<'a>(&self, state: &'a ScriptState) -> &'a str {
        &state.source
    }

    fn reference_count(&self, state: Option<&ScriptState>) -> usize {
        state.map(|s| s.imports.len()).unwrap_or(0)
    }

    fn build_workspace(&self, state: Option<&ScriptState>) -> ScriptWorkspace {
        let imports = state.map(|s| s.imports.as_slice()).unwrap_or(&[]);
        let mut symbols = Vec::new();
        for builtin in BUILTINS {
            let reachable = builtin
                .module
                .is_none_or(|module| imports.iter().any(|i| i == module));
            if reachable {
                symbols.push(SymbolDetail {
                    name: builtin.name.to_string(),
                    kind: CompletionItemKind::Function,
                    detail: builtin.signature.to_string(),
                });
            }
        }
        for module in imports {
            symbols.push(SymbolDetail {
                name: module.clone(),
                kind: CompletionItemKind::Module,
                detail: format!("module `{}`", module),
            });
        }
        ScriptWorkspace { symbols }
    }

    fn completions_at(
        &self,
        workspace: &ScriptWorkspace,
        text: &str,
        offset: usize,
    ) -> Vec<CompletionItem> {
        let prefix = identifier_prefix(text, offset);
        let mut items = Vec::new();
        for name in harvest_bindings(text) {
            if name.starts_with(prefix) {
                items.push(CompletionItem::new(name, CompletionItemKind::Variable));
            }
        }
        for symbol in &workspace.symbols {
            if symbol.name.starts_with(prefix) {
                items.push(CompletionItem::new(symbol.name.clone(), symbol.kind));
            }
        }
        items.sort_by(|a, b| a.display_text.cmp(&b.display_text));
        items.dedup_by(|a, b| a.display_text == b.display_text && a.kind == b.kind);
        items
    }

    fn symbols_at(
        &self,
        workspace: &ScriptWorkspace,
        text: &str,
        offset: usize,
    ) -> Vec<SymbolDetail> {
        let prefix = identifier_prefix(text, offset);
        let mut symbols: Vec<SymbolDetail> = workspace
            .symbols
            .iter()
            .filter(|s| s.name.starts_with(prefix))
            .cloned()
            .collect();
        for name in harvest_bindings(text) {
            if name.starts_with(prefix) {
                symbols.push(SymbolDetail {
                    name,
                    kind: CompletionItemKind::Variable,
                    detail: "let binding".to_string(),
                });
            }
        }
        symbols
    }
}

// ─── Parsing ─────────────────────────────────────────────────────────────

fn raw_parse(code: &str) -> syn::Result<Vec<syn::Stmt>> {
    use syn::parse::Parser;
    syn::Block::parse_within.parse_str(code)
}

fn parse_submission(code: &str) -> Result<Vec<syn::Stmt>> {
    raw_parse(code).map_err(|err| Error::Compilation {
        diagnostics: err
            .into_iter()
            .map(|e| {
                let start = e.span().start();
                Diagnostic::new(e.to_string(), start.line, start.column + 1)
            })
            .collect(),
    })
}

fn use_module_name(tree: &syn::UseTree) -> Option<String> {
    match tree {
        syn::UseTree::Name(name) => Some(name.ident.to_string()),
        _ => None,
    }
}

enum DelimiterScan {
    Balanced,
    Open,
    UnterminatedString,
}

/// Count bracket depth outside strings and line comments.
fn scan_delimiters(code: &str) -> DelimiterScan {
    let mut depth: i64 = 0;
    let mut chars = code.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' => loop {
                match chars.next() {
                    Some('\\') => {
                        chars.next();
                    }
                    Some('"') => break,
                    Some(_) => {}
                    None => return DelimiterScan::UnterminatedString,
                }
            },
            '/' if chars.peek() == Some(&'/') => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        break;
                    }
                }
            }
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            _ => {}
        }
    }
    if depth > 0 {
        DelimiterScan::Open
    } else {
        DelimiterScan::Balanced
    }
}

fn ends_with_operator(code: &str) -> bool {
    code.ends_with(['+', '-', '*', '/', '%', '<', '>', '=', '&', '|', '!', ','])
}

// ─── Validation ──────────────────────────────────────────────────────────

fn push_diag(diags: &mut Vec<Diagnostic>, span: proc_macro2::Span, message: impl Into<String>) {
    let start = span.start();
    diags.push(Diagnostic::new(message, start.line, start.column + 1));
}

/// Collect every compile-time diagnostic before any evaluation happens.
fn validate(stmts: &[syn::Stmt]) -> Vec<Diagnostic> {
    let mut diags = Vec::new();
    for stmt in stmts {
        match stmt {
            syn::Stmt::Local(local) => {
                if !matches!(local.pat, syn::Pat::Ident(_)) {
                    push_diag(
                        &mut diags,
                        local.pat.span(),
                        "only simple `let name = ...` bindings are supported",
                    );
                }
                match &local.init {
                    Some(init) => validate_expr(&init.expr, &mut diags),
                    None => push_diag(&mut diags, local.span(), "`let` binding requires an initializer"),
                }
            }
            syn::Stmt::Item(syn::Item::Use(item)) => match use_module_name(&item.tree) {
                Some(name) if MODULES.contains(&name.as_str()) => {}
                Some(name) => {
                    push_diag(&mut diags, item.span(), format!("unknown module `{}`", name));
                }
                None => push_diag(
                    &mut diags,
                    item.span(),
                    "only `use <module>;` imports are supported",
                ),
            },
            syn::Stmt::Item(item) => {
                push_diag(&mut diags, item.span(), "item declarations are not supported");
            }
            syn::Stmt::Macro(mac) => {
                push_diag(&mut diags, mac.span(), "macro invocations are not supported");
            }
            syn::Stmt::Expr(expr, _) => validate_expr(expr, &mut diags),
        }
    }
    diags
}

fn validate_expr(expr: &syn::Expr, diags: &mut Vec<Diagnostic>) {
    match expr {
        syn::Expr::Lit(lit) => match &lit.lit {
            syn::Lit::Int(_) | syn::Lit::Float(_) | syn::Lit::Bool(_) | syn::Lit::Str(_) => {}
            other => push_diag(diags, other.span(), "unsupported literal"),
        },
        syn::Expr::Path(path) => {
            if path.path.get_ident().is_none() {
                push_diag(diags, path.span(), "only simple names are supported");
            }
        }
        syn::Expr::Binary(bin) => {
            if op_symbol(&bin.op).is_none() {
                push_diag(diags, bin.span(), "unsupported operator");
            }
            validate_expr(&bin.left, diags);
            validate_expr(&bin.right, diags);
        }
        syn::Expr::Unary(un) => {
            if !matches!(un.op, syn::UnOp::Neg(_) | syn::UnOp::Not(_)) {
                push_diag(diags, un.span(), "unsupported unary operator");
            }
            validate_expr(&un.expr, diags);
        }
        syn::Expr::Paren(paren) => validate_expr(&paren.expr, diags),
        syn::Expr::Call(call) => {
            match call.func.as_ref() {
                syn::Expr::Path(p) if p.path.get_ident().is_some() => {}
                other => push_diag(diags, other.span(), "only calls to named functions are supported"),
            }
            for arg in &call.args {
                validate_expr(arg, diags);
            }
        }
        syn::Expr::Array(array) => {
            for elem in &array.elems {
                validate_expr(elem, diags);
            }
        }
        other => push_diag(diags, other.span(), "unsupported expression"),
    }
}

// ─── Evaluation ──────────────────────────────────────────────────────────

fn op_symbol(op: &syn::BinOp) -> Option<&'static str> {
    use syn::BinOp::*;
    Some(match op {
        Add(_) => "+",
        Sub(_) => "-",
        Mul(_) => "*",
        Div(_) => "/",
        Rem(_) => "%",
        Eq(_) => "==",
        Ne(_) => "!=",
        Lt(_) => "<",
        Le(_) => "<=",
        Gt(_) => ">",
        Ge(_) => ">=",
        And(_) => "&&",
        Or(_) => "||",
        _ => return None,
    })
}

fn eval_expr(
    expr: &syn::Expr,
    env: &FxHashMap<String, Value>,
    imports: &[String],
) -> Result<Value> {
    match expr {
        syn::Expr::Lit(lit) => eval_lit(&lit.lit),
        syn::Expr::Path(path) => {
            let ident = path
                .path
                .get_ident()
                .ok_or_else(|| Error::Runtime("only simple names are supported".to_string()))?;
            let name = ident.to_string();
            env.get(&name)
                .cloned()
                .ok_or_else(|| Error::Runtime(format!("unknown variable `{}`", name)))
        }
        syn::Expr::Binary(bin) => {
            let sym = op_symbol(&bin.op)
                .ok_or_else(|| Error::Runtime("unsupported operator".to_string()))?;
            // Short-circuit the logical operators.
            if sym == "&&" || sym == "||" {
                let lhs = eval_expr(&bin.left, env, imports)?;
                let Value::Bool(l) = lhs else {
                    return Err(Error::Runtime(format!(
                        "cannot apply `{}` to {}",
                        sym,
                        lhs.type_name()
                    )));
                };
                if (sym == "&&" && !l) || (sym == "||" && l) {
                    return Ok(Value::Bool(l));
                }
                let rhs = eval_expr(&bin.right, env, imports)?;
                let Value::Bool(r) = rhs else {
                    return Err(Error::Runtime(format!(
                        "cannot apply `{}` to {}",
                        sym,
                        rhs.type_name()
                    )));
                };
                return Ok(Value::Bool(r));
            }
            let lhs = eval_expr(&bin.left, env, imports)?;
            let rhs = eval_expr(&bin.right, env, imports)?;
            eval_binary(sym, lhs, rhs)
        }
        syn::Expr::Unary(un) => {
            let value = eval_expr(&un.expr, env, imports)?;
            match (&un.op, value) {
                (syn::UnOp::Neg(_), Value::Int(n)) => n
                    .checked_neg()
                    .map(Value::Int)
                    .ok_or_else(|| Error::Runtime("attempt to negate with overflow".to_string())),
                (syn::UnOp::Neg(_), Value::Float(x)) => Ok(Value::Float(-x)),
                (syn::UnOp::Not(_), Value::Bool(b)) => Ok(Value::Bool(!b)),
                (_, value) => Err(Error::Runtime(format!(
                    "cannot apply unary operator to {}",
                    value.type_name()
                ))),
            }
        }
        syn::Expr::Paren(paren) => eval_expr(&paren.expr, env, imports),
        syn::Expr::Call(call) => {
            let syn::Expr::Path(path) = call.func.as_ref() else {
                return Err(Error::Runtime(
                    "only calls to named functions are supported".to_string(),
                ));
            };
            let name = path
                .path
                .get_ident()
                .ok_or_else(|| Error::Runtime("only simple names are supported".to_string()))?
                .to_string();
            let args = call
                .args
                .iter()
                .map(|arg| eval_expr(arg, env, imports))
                .collect::<Result<Vec<_>>>()?;
            apply_builtin(&name, args, imports)
        }
        syn::Expr::Array(array) => {
            let items = array
                .elems
                .iter()
                .map(|elem| eval_expr(elem, env, imports))
                .collect::<Result<Vec<_>>>()?;
            Ok(Value::List(items))
        }
        _ => Err(Error::Runtime("unsupported expression".to_string())),
    }
}

fn eval_lit(lit: &syn::Lit) -> Result<Value> {
    match lit {
        syn::Lit::Int(n) => n
            .base10_parse::<i64>()
            .map(Value::Int)
            .map_err(|e| Error::Runtime(format!("invalid integer literal: {}", e))),
        syn::Lit::Float(x) => x
            .base10_parse::<f64>()
            .map(Value::Float)
            .map_err(|e| Error::Runtime(format!("invalid float literal: {}", e))),
        syn::Lit::Bool(b) => Ok(Value::Bool(b.value)),
        syn::Lit::Str(s) => Ok(Value::Str(s.value())),
        _ => Err(Error::Runtime("unsupported literal".to_string())),
    }
}

fn as_float(value: &Value) -> Option<f64> {
    match value {
        Value::Int(n) => Some(*n as f64),
        Value::Float(x) => Some(*x),
        _ => None,
    }
}

fn mismatch(op: &str, lhs: &Value, rhs: &Value) -> Error {
    Error::Runtime(format!(
        "cannot apply `{}` to {} and {}",
        op,
        lhs.type_name(),
        rhs.type_name()
    ))
}

fn overflow(op: &str) -> Error {
    Error::Runtime(format!("attempt to `{}` with overflow", op))
}

fn eval_binary(op: &str, lhs: Value, rhs: Value) -> Result<Value> {
    match op {
        "+" | "-" | "*" | "/" | "%" => eval_arith(op, lhs, rhs),
        "==" | "!=" => {
            let equal = match (&lhs, &rhs) {
                (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
                    as_float(&lhs) == as_float(&rhs)
                }
                (a, b) if std::mem::discriminant(a) == std::mem::discriminant(b) => a == b,
                _ => return Err(mismatch(op, &lhs, &rhs)),
            };
            Ok(Value::Bool(if op == "==" { equal } else { !equal }))
        }
        "<" | "<=" | ">" | ">=" => {
            let ordering = match (&lhs, &rhs) {
                (Value::Str(a), Value::Str(b)) => a.partial_cmp(b),
                _ => match (as_float(&lhs), as_float(&rhs)) {
                    (Some(a), Some(b)) => a.partial_cmp(&b),
                    _ => return Err(mismatch(op, &lhs, &rhs)),
                },
            };
            let Some(ordering) = ordering else {
                return Err(Error::Runtime(format!(
                    "values are not comparable with `{}`",
                    op
                )));
            };
            let result = match op {
                "<" => ordering.is_lt(),
                "<=" => ordering.is_le(),
                ">" => ordering.is_gt(),
                _ => ordering.is_ge(),
            };
            Ok(Value::Bool(result))
        }
        _ => Err(Error::Runtime(format!("unsupported operator `{}`", op))),
    }
}

fn eval_arith(op: &str, lhs: Value, rhs: Value) -> Result<Value> {
    match (op, &lhs, &rhs) {
        ("+", Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{}{}", a, b))),
        ("+", Value::Int(a), Value::Int(b)) => {
            a.checked_add(*b).map(Value::Int).ok_or_else(|| overflow(op))
        }
        ("-", Value::Int(a), Value::Int(b)) => {
            a.checked_sub(*b).map(Value::Int).ok_or_else(|| overflow(op))
        }
        ("*", Value::Int(a), Value::Int(b)) => {
            a.checked_mul(*b).map(Value::Int).ok_or_else(|| overflow(op))
        }
        ("/", Value::Int(a), Value::Int(b)) => a
            .checked_div(*b)
            .map(Value::Int)
            .ok_or_else(|| Error::Runtime("attempt to divide by zero".to_string())),
        ("%", Value::Int(a), Value::Int(b)) => a
            .checked_rem(*b)
            .map(Value::Int)
            .ok_or_else(|| {
                Error::Runtime("attempt to calculate the remainder with a divisor of zero".to_string())
            }),
        _ => match (as_float(&lhs), as_float(&rhs)) {
            (Some(a), Some(b)) => {
                let result = match op {
                    "+" => a + b,
                    "-" => a - b,
                    "*" => a * b,
                    "/" => a / b,
                    _ => a % b,
                };
                Ok(Value::Float(result))
            }
            _ => Err(mismatch(op, &lhs, &rhs)),
        },
    }
}

fn apply_builtin(name: &str, args: Vec<Value>, imports: &[String]) -> Result<Value> {
    let Some(builtin) = BUILTINS.iter().find(|b| b.name == name) else {
        return Err(Error::Runtime(format!("unknown function `{}`", name)));
    };
    if let Some(module) = builtin.module
        && !imports.iter().any(|i| i == module)
    {
        return Err(Error::Runtime(format!(
            "function `{}` requires `use {};`",
            name, module
        )));
    }
    if args.len() != builtin.arity {
        return Err(Error::Runtime(format!(
            "`{}` expects {} argument(s), got {}",
            name,
            builtin.arity,
            args.len()
        )));
    }

    let numeric = |v: &Value| {
        as_float(v).ok_or_else(|| {
            Error::Runtime(format!("`{}` expects a numeric argument, got {}", name, v.type_name()))
        })
    };
    let string = |v: &Value| match v {
        Value::Str(s) => Ok(s.clone()),
        other => Err(Error::Runtime(format!(
            "`{}` expects a string argument, got {}",
            name,
            other.type_name()
        ))),
    };

    match name {
        "abs" => match &args[0] {
            Value::Int(n) => n
                .checked_abs()
                .map(Value::Int)
                .ok_or_else(|| Error::Runtime("attempt to negate with overflow".to_string())),
            Value::Float(x) => Ok(Value::Float(x.abs())),
            other => Err(Error::Runtime(format!(
                "`abs` expects a numeric argument, got {}",
                other.type_name()
            ))),
        },
        "min" | "max" => match (&args[0], &args[1]) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(if name == "min" {
                *a.min(b)
            } else {
                *a.max(b)
            })),
            (a, b) => {
                let (x, y) = (numeric(a)?, numeric(b)?);
                Ok(Value::Float(if name == "min" { x.min(y) } else { x.max(y) }))
            }
        },
        "len" => match &args[0] {
            Value::Str(s) => Ok(Value::Int(s.chars().count() as i64)),
            Value::List(items) => Ok(Value::Int(items.len() as i64)),
            other => Err(Error::Runtime(format!(
                "`len` expects a string or list, got {}",
                other.type_name()
            ))),
        },
        "sqrt" => Ok(Value::Float(numeric(&args[0])?.sqrt())),
        "pow" => Ok(Value::Float(numeric(&args[0])?.powf(numeric(&args[1])?))),
        "floor" => Ok(Value::Int(numeric(&args[0])?.floor() as i64)),
        "ceil" => Ok(Value::Int(numeric(&args[0])?.ceil() as i64)),
        "upper" => Ok(Value::Str(string(&args[0])?.to_uppercase())),
        "lower" => Ok(Value::Str(string(&args[0])?.to_lowercase())),
        "trim" => Ok(Value::Str(string(&args[0])?.trim().to_string())),
        _ => Err(Error::Runtime(format!("unknown function `{}`", name))),
    }
}

// ─── Completion helpers ──────────────────────────────────────────────────

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// The identifier fragment immediately before `offset`.
fn identifier_prefix(text: &str, offset: usize) -> &str {
    let mut end = offset.min(text.len());
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    let start = text[..end]
        .char_indices()
        .rev()
        .take_while(|(_, c)| is_ident_char(*c))
        .last()
        .map(|(i, _)| i)
        .unwrap_or(end);
    &text[start..end]
}

/// Names bound with `let` anywhere in the document.
fn harvest_bindings(text: &str) -> Vec<String> {
    let mut names = Vec::new();
    for line in text.lines() {
        if let Some(rest) = line.trim_start().strip_prefix("let ") {
            let name: String = rest
                .trim_start()
                .chars()
                .take_while(|c| is_ident_char(*c))
                .collect();
            if !name.is_empty() && !names.contains(&name) {
                names.push(name);
            }
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token() -> CancellationToken {
        CancellationToken::new()
    }

    async fn run_fresh(code: &str) -> Result<ScriptState> {
        ScriptBackend::new().run(code, None, token()).await
    }

    #[tokio::test]
    async fn evaluates_arithmetic() {
        let backend = ScriptBackend::new();
        let state = run_fresh("1+3").await.unwrap();
        assert_eq!(backend.return_value(&state), Some(Value::Int(4)));
    }

    #[tokio::test]
    async fn bindings_carry_across_submissions() {
        let backend = ScriptBackend::new();
        let first = run_fresh("let x = 10;").await.unwrap();
        assert!(!backend.has_return_value(&first));

        let second = backend.run("x * 2", Some(&first), token()).await.unwrap();
        assert_eq!(backend.return_value(&second), Some(Value::Int(20)));
    }

    #[tokio::test]
    async fn trailing_semicolon_suppresses_return_value() {
        let backend = ScriptBackend::new();
        let state = run_fresh("1 + 3;").await.unwrap();
        assert!(!backend.has_return_value(&state));
    }

    #[tokio::test]
    async fn compile_fault_carries_position() {
        let err = run_fresh("let = 5;").await.unwrap_err();
        match err {
            Error::Compilation { diagnostics } => {
                assert!(!diagnostics.is_empty());
                assert_eq!(diagnostics[0].line, 1);
            }
            other => panic!("expected compilation fault, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn unknown_module_is_a_compile_fault() {
        let err = run_fresh("use nonsense;").await.unwrap_err();
        match err {
            Error::Compilation { diagnostics } => {
                assert!(diagnostics[0].message.contains("unknown module"));
            }
            other => panic!("expected compilation fault, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn division_by_zero_is_a_runtime_fault() {
        let err = run_fresh("1 / 0").await.unwrap_err();
        match err {
            Error::Runtime(message) => assert_eq!(message, "attempt to divide by zero"),
            other => panic!("expected runtime fault, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn unknown_variable_is_a_runtime_fault() {
        let err = run_fresh("y + 1").await.unwrap_err();
        match err {
            Error::Runtime(message) => assert!(message.contains("unknown variable `y`")),
            other => panic!("expected runtime fault, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn module_functions_require_import() {
        let backend = ScriptBackend::new();
        let err = run_fresh("sqrt(4)").await.unwrap_err();
        match err {
            Error::Runtime(message) => assert!(message.contains("use math")),
            other => panic!("expected runtime fault, got {:?}", other),
        }

        let imported = run_fresh("use math;").await.unwrap();
        let state = backend.run("sqrt(4)", Some(&imported), token()).await.unwrap();
        assert_eq!(backend.return_value(&state), Some(Value::Float(2.0)));
    }

    #[tokio::test]
    async fn imports_grow_the_reference_set() {
        let backend = ScriptBackend::new();
        assert_eq!(backend.reference_count(None), 0);
        let state = run_fresh("use math;\nuse text;").await.unwrap();
        assert_eq!(backend.reference_count(Some(&state)), 2);
        // Re-importing does not grow the set.
        let again = backend.run("use math;", Some(&state), token()).await.unwrap();
        assert_eq!(backend.reference_count(Some(&again)), 2);
    }

    #[tokio::test]
    async fn pre_cancelled_token_short_circuits() {
        let cancelled = CancellationToken::new();
        cancelled.cancel();
        let err = ScriptBackend::new()
            .run("1+1", None, cancelled)
            .await
            .unwrap_err();
        assert!(err.is_cancellation());
    }

    #[test]
    fn completeness_classification() {
        let backend = ScriptBackend::new();
        assert!(backend.is_complete_submission("1+3"));
        assert!(backend.is_complete_submission("let x = 5;"));
        assert!(!backend.is_complete_submission("let x = (1 +"));
        assert!(!backend.is_complete_submission("min(1,"));
        assert!(!backend.is_complete_submission("1 +"));
        assert!(!backend.is_complete_submission("\"unterminated"));
        // Invalid but complete: classification is not validation.
        assert!(backend.is_complete_submission("let = 5;"));
    }

    #[test]
    fn strings_in_source_do_not_confuse_the_scanner() {
        let backend = ScriptBackend::new();
        assert!(backend.is_complete_submission(r#"let s = "(unclosed in string";"#));
    }

    #[tokio::test]
    async fn workspace_symbols_follow_imports() {
        let backend = ScriptBackend::new();
        let empty = backend.build_workspace(None);
        let items = backend.completions_at(&empty, "", 0);
        assert!(items.iter().any(|i| i.display_text == "min"));
        assert!(!items.iter().any(|i| i.display_text == "sqrt"));

        let state = run_fresh("use math;").await.unwrap();
        let ws = backend.build_workspace(Some(&state));
        let items = backend.completions_at(&ws, "", 0);
        assert!(items.iter().any(|i| i.display_text == "sqrt"));
    }

    #[test]
    fn completions_include_document_bindings() {
        let backend = ScriptBackend::new();
        let ws = backend.build_workspace(None);
        let text = "let total = 40;\nto";
        let items = backend.completions_at(&ws, text, text.len());
        assert!(items.iter().any(|i| i.display_text == "total"));
    }

    #[test]
    fn prefix_extraction() {
        assert_eq!(identifier_prefix("let x = mi", 10), "mi");
        assert_eq!(identifier_prefix("1 + ", 4), "");
        assert_eq!(identifier_prefix("total", 3), "tot");
    }
}
