//! YANG text parsing
//!
//! Two stages: a generic statement parser (keyword, optional argument,
//! optional block of sub-statements) and a compiler turning a `module`
//! statement into a [`Module`] plus its pending augments.

use std::collections::HashMap;
use std::fmt;

use crate::qname::{QName, QNameModule, Revision};
use crate::schema::{
    flatten_data_nodes, CaseSchema, ChoiceSchema, ContainerSchema, Import, LeafSchema, LeafType,
    ListSchema, Module, NotificationSchema, OperationSchema, SchemaNode,
};

/// Maximum nesting of `uses` expansions
const MAX_USES_DEPTH: usize = 32;

/// Syntax error with the line it was found on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YangError {
    pub line: usize,
    pub message: String,
}

impl fmt::Display for YangError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for YangError {}

/// One YANG statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub keyword: String,
    pub argument: Option<String>,
    pub children: Vec<Statement>,
    pub line: usize,
}

impl Statement {
    pub fn child(&self, keyword: &str) -> Option<&Statement> {
        self.children.iter().find(|s| s.keyword == keyword)
    }

    pub fn child_argument(&self, keyword: &str) -> Option<&str> {
        self.child(keyword).and_then(|s| s.argument.as_deref())
    }

    fn argument_or_err(&self) -> std::result::Result<&str, YangError> {
        self.argument.as_deref().ok_or_else(|| YangError {
            line: self.line,
            message: format!("statement '{}' requires an argument", self.keyword),
        })
    }
}

// ============================================================================
// Tokenizer
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    Quoted(String),
    Open,
    Close,
    Semicolon,
    Plus,
}

fn tokenize(text: &str) -> std::result::Result<Vec<(Token, usize)>, YangError> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut line = 1;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\n' => {
                line += 1;
                i += 1;
            }
            c if c.is_whitespace() => i += 1,
            '/' if chars.get(i + 1) == Some(&'/') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                let start = line;
                i += 2;
                loop {
                    match chars.get(i) {
                        None => {
                            return Err(YangError {
                                line: start,
                                message: "unterminated block comment".into(),
                            })
                        }
                        Some('*') if chars.get(i + 1) == Some(&'/') => {
                            i += 2;
                            break;
                        }
                        Some('\n') => line += 1,
                        Some(_) => {}
                    }
                    i += 1;
                }
            }
            '{' => {
                tokens.push((Token::Open, line));
                i += 1;
            }
            '}' => {
                tokens.push((Token::Close, line));
                i += 1;
            }
            ';' => {
                tokens.push((Token::Semicolon, line));
                i += 1;
            }
            '+' if matches!(tokens.last(), Some((Token::Quoted(_), _))) => {
                tokens.push((Token::Plus, line));
                i += 1;
            }
            '"' | '\'' => {
                let start = line;
                let mut value = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => {
                            return Err(YangError {
                                line: start,
                                message: "unterminated quoted string".into(),
                            })
                        }
                        Some(&q) if q == c => {
                            i += 1;
                            break;
                        }
                        Some('\\') if c == '"' => {
                            match chars.get(i + 1) {
                                Some('n') => value.push('\n'),
                                Some('t') => value.push('\t'),
                                Some('"') => value.push('"'),
                                Some('\\') => value.push('\\'),
                                Some(other) => {
                                    value.push('\\');
                                    value.push(*other);
                                }
                                None => value.push('\\'),
                            }
                            i += 2;
                        }
                        Some(&ch) => {
                            if ch == '\n' {
                                line += 1;
                            }
                            value.push(ch);
                            i += 1;
                        }
                    }
                }
                tokens.push((Token::Quoted(value), start));
            }
            _ => {
                let mut word = String::new();
                while i < chars.len() {
                    let ch = chars[i];
                    if ch.is_whitespace() || ch == '{' || ch == '}' || ch == ';' {
                        break;
                    }
                    word.push(ch);
                    i += 1;
                }
                tokens.push((Token::Word(word), line));
            }
        }
    }
    Ok(tokens)
}

// ============================================================================
// Statement parser
// ============================================================================

/// Parse YANG text into its single top-level statement
pub fn parse_statements(text: &str) -> std::result::Result<Statement, YangError> {
    let tokens = tokenize(text)?;
    let mut pos = 0;
    let statement = parse_statement(&tokens, &mut pos)?;
    if let Some((_, line)) = tokens.get(pos) {
        return Err(YangError {
            line: *line,
            message: "unexpected content after top-level statement".into(),
        });
    }
    Ok(statement)
}

fn parse_statement(
    tokens: &[(Token, usize)],
    pos: &mut usize,
) -> std::result::Result<Statement, YangError> {
    let eof_line = tokens.last().map(|(_, l)| *l).unwrap_or(1);
    let unexpected_eof = || YangError {
        line: eof_line,
        message: "unexpected end of input".into(),
    };

    let (keyword, line) = match tokens.get(*pos) {
        Some((Token::Word(word), line)) => (word.clone(), *line),
        Some((token, line)) => {
            return Err(YangError {
                line: *line,
                message: format!("expected keyword, found {:?}", token),
            })
        }
        None => return Err(unexpected_eof()),
    };
    *pos += 1;

    let argument = match tokens.get(*pos) {
        Some((Token::Word(word), _)) => {
            *pos += 1;
            Some(word.clone())
        }
        Some((Token::Quoted(first), _)) => {
            *pos += 1;
            let mut value = first.clone();
            while let Some((Token::Plus, plus_line)) = tokens.get(*pos) {
                match tokens.get(*pos + 1) {
                    Some((Token::Quoted(next), _)) => {
                        value.push_str(next);
                        *pos += 2;
                    }
                    _ => {
                        return Err(YangError {
                            line: *plus_line,
                            message: "expected quoted string after '+'".into(),
                        })
                    }
                }
            }
            Some(value)
        }
        _ => None,
    };

    let mut children = Vec::new();
    match tokens.get(*pos) {
        Some((Token::Semicolon, _)) => *pos += 1,
        Some((Token::Open, _)) => {
            *pos += 1;
            loop {
                match tokens.get(*pos) {
                    Some((Token::Close, _)) => {
                        *pos += 1;
                        break;
                    }
                    Some(_) => children.push(parse_statement(tokens, pos)?),
                    None => return Err(unexpected_eof()),
                }
            }
        }
        Some((token, line)) => {
            return Err(YangError {
                line: *line,
                message: format!("expected ';' or '{{' after '{}', found {:?}", keyword, token),
            })
        }
        None => return Err(unexpected_eof()),
    }

    Ok(Statement {
        keyword,
        argument,
        children,
        line,
    })
}

// ============================================================================
// Module compiler
// ============================================================================

/// Augment waiting for its target to be resolved against the other modules
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PendingAugment {
    /// Target path segments as (prefix, local name)
    pub target: Vec<(Option<String>, String)>,
    pub target_text: String,
    pub children: Vec<SchemaNode>,
    pub actions: Vec<OperationSchema>,
    pub notifications: Vec<NotificationSchema>,
}

#[derive(Debug, Clone)]
pub(crate) struct CompiledModule {
    pub module: Module,
    pub augments: Vec<PendingAugment>,
}

#[derive(Default)]
struct DataChildren {
    nodes: Vec<SchemaNode>,
    actions: Vec<OperationSchema>,
    notifications: Vec<NotificationSchema>,
}

struct Compiler<'a> {
    module: QNameModule,
    prefix: String,
    groupings: HashMap<String, &'a Statement>,
    typedefs: HashMap<String, &'a Statement>,
}

/// Compile a parsed `module` statement
pub(crate) fn compile_module(root: &Statement) -> std::result::Result<CompiledModule, YangError> {
    if root.keyword == "submodule" {
        return Err(YangError {
            line: root.line,
            message: "submodules are not supported".into(),
        });
    }
    if root.keyword != "module" {
        return Err(YangError {
            line: root.line,
            message: format!("expected 'module', found '{}'", root.keyword),
        });
    }

    let name = root.argument_or_err()?.to_string();
    let missing = |keyword: &str| YangError {
        line: root.line,
        message: format!("module '{}' has no {} statement", name, keyword),
    };
    let namespace = root.child_argument("namespace").ok_or_else(|| missing("namespace"))?;
    let prefix = root.child_argument("prefix").ok_or_else(|| missing("prefix"))?;

    let mut revision: Option<Revision> = None;
    for stmt in root.children.iter().filter(|s| s.keyword == "revision") {
        let parsed = parse_revision(stmt)?;
        if revision.as_ref().map_or(true, |current| parsed > *current) {
            revision = Some(parsed);
        }
    }

    let mut imports = Vec::new();
    for stmt in root.children.iter().filter(|s| s.keyword == "import") {
        let module = stmt.argument_or_err()?.to_string();
        let prefix = stmt.child_argument("prefix").ok_or_else(|| YangError {
            line: stmt.line,
            message: format!("import of '{}' has no prefix", module),
        })?;
        let revision = match stmt.child("revision-date") {
            Some(date) => Some(parse_revision(date)?),
            None => None,
        };
        imports.push(Import {
            module,
            prefix: prefix.to_string(),
            revision,
        });
    }

    let mut compiler = Compiler {
        module: QNameModule::new(namespace, revision.clone()),
        prefix: prefix.to_string(),
        groupings: HashMap::new(),
        typedefs: HashMap::new(),
    };
    compiler.collect_definitions(root);

    let data = compiler.data_children(&root.children, 0)?;
    let mut rpcs = Vec::new();
    let mut augments = Vec::new();
    for stmt in &root.children {
        match stmt.keyword.as_str() {
            "rpc" => rpcs.push(compiler.operation(stmt)?),
            "augment" => augments.push(compiler.augment(stmt)?),
            _ => {}
        }
    }

    Ok(CompiledModule {
        module: Module {
            name,
            namespace: namespace.to_string(),
            prefix: prefix.to_string(),
            revision,
            imports,
            children: data.nodes,
            rpcs,
            notifications: data.notifications,
        },
        augments,
    })
}

fn parse_revision(stmt: &Statement) -> std::result::Result<Revision, YangError> {
    let text = stmt.argument_or_err()?;
    Revision::parse(text).map_err(|e| YangError {
        line: stmt.line,
        message: e.to_string(),
    })
}

/// Strip an optional `prefix:` from an identifier
fn split_prefixed(value: &str) -> (Option<&str>, &str) {
    match value.split_once(':') {
        Some((prefix, local)) => (Some(prefix), local),
        None => (None, value),
    }
}

impl<'a> Compiler<'a> {
    fn qname(&self, local: &str) -> QName {
        QName::new(self.module.clone(), local)
    }

    fn is_local_prefix(&self, prefix: Option<&str>) -> bool {
        prefix.map_or(true, |p| p == self.prefix)
    }

    fn collect_definitions(&mut self, stmt: &'a Statement) {
        for child in &stmt.children {
            if let Some(name) = child.argument.as_deref() {
                match child.keyword.as_str() {
                    "grouping" => {
                        self.groupings.entry(name.to_string()).or_insert(child);
                    }
                    "typedef" => {
                        self.typedefs.entry(name.to_string()).or_insert(child);
                    }
                    _ => {}
                }
            }
            self.collect_definitions(child);
        }
    }

    fn leaf_type(&self, stmt: &Statement) -> LeafType {
        let mut type_name = stmt.child_argument("type").map(str::to_string);
        for _ in 0..MAX_USES_DEPTH {
            let Some(name) = type_name.take() else {
                break;
            };
            if let Some(builtin) = LeafType::from_builtin(&name) {
                return builtin;
            }
            let (prefix, local) = split_prefixed(&name);
            if !self.is_local_prefix(prefix) {
                break;
            }
            type_name = self
                .typedefs
                .get(local)
                .and_then(|typedef| typedef.child_argument("type"))
                .map(str::to_string);
        }
        LeafType::String
    }

    fn data_children(
        &self,
        statements: &[Statement],
        depth: usize,
    ) -> std::result::Result<DataChildren, YangError> {
        let mut out = DataChildren::default();
        for stmt in statements {
            match stmt.keyword.as_str() {
                "container" | "list" | "leaf" | "leaf-list" | "anydata" | "anyxml" | "choice" => {
                    out.nodes.push(self.data_node(stmt, depth)?);
                }
                "uses" => {
                    let expanded = self.uses(stmt, depth)?;
                    out.nodes.extend(expanded.nodes);
                    out.actions.extend(expanded.actions);
                    out.notifications.extend(expanded.notifications);
                }
                "action" => out.actions.push(self.operation(stmt)?),
                "notification" => out.notifications.push(self.notification(stmt)?),
                _ => {}
            }
        }
        check_unique(&out.nodes, statements.first().map_or(0, |s| s.line))?;
        Ok(out)
    }

    fn uses(&self, stmt: &Statement, depth: usize) -> std::result::Result<DataChildren, YangError> {
        let reference = stmt.argument_or_err()?;
        if depth >= MAX_USES_DEPTH {
            return Err(YangError {
                line: stmt.line,
                message: format!("grouping '{}' nests too deeply", reference),
            });
        }
        let (prefix, local) = split_prefixed(reference);
        let grouping = self
            .groupings
            .get(local)
            .filter(|_| self.is_local_prefix(prefix))
            .ok_or_else(|| YangError {
                line: stmt.line,
                message: format!("grouping '{}' not found", reference),
            })?;
        self.data_children(&grouping.children, depth + 1)
    }

    fn data_node(&self, stmt: &Statement, depth: usize) -> std::result::Result<SchemaNode, YangError> {
        let qname = self.qname(stmt.argument_or_err()?);
        let node = match stmt.keyword.as_str() {
            "container" => {
                let data = self.data_children(&stmt.children, depth)?;
                SchemaNode::Container(ContainerSchema {
                    qname,
                    presence: stmt.child("presence").is_some(),
                    children: data.nodes,
                    actions: data.actions,
                    notifications: data.notifications,
                })
            }
            "list" => {
                let data = self.data_children(&stmt.children, depth)?;
                let keys = stmt
                    .child_argument("key")
                    .unwrap_or("")
                    .split_whitespace()
                    .map(|key| self.qname(split_prefixed(key).1))
                    .collect::<Vec<_>>();
                for key in &keys {
                    if !matches!(crate::schema::find_data_child(&data.nodes, key), Some(SchemaNode::Leaf(_))) {
                        return Err(YangError {
                            line: stmt.line,
                            message: format!("list '{}' key '{}' is not a leaf", qname.local_name(), key.local_name()),
                        });
                    }
                }
                SchemaNode::List(ListSchema {
                    qname,
                    keys,
                    children: data.nodes,
                    actions: data.actions,
                    notifications: data.notifications,
                })
            }
            "leaf" => SchemaNode::Leaf(LeafSchema {
                qname,
                leaf_type: self.leaf_type(stmt),
            }),
            "leaf-list" => SchemaNode::LeafList(LeafSchema {
                qname,
                leaf_type: self.leaf_type(stmt),
            }),
            "anydata" | "anyxml" => SchemaNode::AnyData(qname),
            "choice" => {
                let mut cases = Vec::new();
                for child in &stmt.children {
                    match child.keyword.as_str() {
                        "case" => {
                            let data = self.data_children(&child.children, depth)?;
                            cases.push(CaseSchema {
                                qname: self.qname(child.argument_or_err()?),
                                children: data.nodes,
                            });
                        }
                        "container" | "list" | "leaf" | "leaf-list" | "anydata" | "anyxml" | "choice" => {
                            // Shorthand case named after its single node
                            let node = self.data_node(child, depth)?;
                            cases.push(CaseSchema {
                                qname: node.qname().clone(),
                                children: vec![node],
                            });
                        }
                        _ => {}
                    }
                }
                SchemaNode::Choice(ChoiceSchema { qname, cases })
            }
            other => {
                return Err(YangError {
                    line: stmt.line,
                    message: format!("'{}' is not a data definition", other),
                })
            }
        };
        Ok(node)
    }

    fn operation(&self, stmt: &Statement) -> std::result::Result<OperationSchema, YangError> {
        let qname = self.qname(stmt.argument_or_err()?);
        let section = |keyword: &str| -> std::result::Result<Vec<SchemaNode>, YangError> {
            match stmt.child(keyword) {
                Some(s) => Ok(self.data_children(&s.children, 0)?.nodes),
                None => Ok(Vec::new()),
            }
        };
        Ok(OperationSchema {
            qname,
            input: section("input")?,
            output: section("output")?,
        })
    }

    fn notification(&self, stmt: &Statement) -> std::result::Result<NotificationSchema, YangError> {
        Ok(NotificationSchema {
            qname: self.qname(stmt.argument_or_err()?),
            children: self.data_children(&stmt.children, 0)?.nodes,
        })
    }

    fn augment(&self, stmt: &Statement) -> std::result::Result<PendingAugment, YangError> {
        let target_text = stmt.argument_or_err()?.to_string();
        let target = target_text
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|segment| {
                let (prefix, local) = split_prefixed(segment.trim());
                (prefix.map(String::from), local.to_string())
            })
            .collect::<Vec<_>>();
        if target.is_empty() {
            return Err(YangError {
                line: stmt.line,
                message: "augment target is empty".into(),
            });
        }
        let data = self.data_children(&stmt.children, 0)?;
        Ok(PendingAugment {
            target,
            target_text,
            children: data.nodes,
            actions: data.actions,
            notifications: data.notifications,
        })
    }
}

/// Detect two data nodes with the same name among siblings
pub(crate) fn check_unique(nodes: &[SchemaNode], line: usize) -> std::result::Result<(), YangError> {
    let flat = flatten_data_nodes(nodes);
    for (i, node) in flat.iter().enumerate() {
        if flat[..i].iter().any(|other| other.qname().matches(node.qname())) {
            return Err(YangError {
                line,
                message: format!("duplicate definition of '{}'", node.qname().local_name()),
            });
        }
    }
    Ok(())
}
