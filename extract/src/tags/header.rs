//! Header compiler: turns a `#tags` row into record constructors.
//!
//! Cells are compiled left to right. State that spans cells (current table,
//! last declared field, the open `%child` scope) lives in [`ParserContext`]
//! and is discarded at the end of the row.
//!
//! ```text
//! #tags | #sample.id | #sample.weight | #%units | *#sample.protocol.id | #sample%child.id
//!   │         │             │              │               │                    │
//!   │         id          weight      weight%units   protocol.id (list)   child record
//!   └─ may carry global literals: #tags #sample.type="tissue"
//! ```

use crate::error::{Location, TagError, TagResult};
use crate::sheet::Worksheet;
use crate::store::ID_FIELD;

use super::fields::{FieldConstructor, FieldRef, Operand};
use super::lexer::{tokenize, Token};
use super::record::RecordConstructor;

/// Compile header row `row` of `sheet`.
pub fn compile_header(sheet: &Worksheet, row: usize) -> TagResult<Vec<RecordConstructor>> {
    let mut context = ParserContext::new(sheet, row);
    let cells = sheet.rows.get(row).map(Vec::as_slice).unwrap_or(&[]);
    for (column, cell) in cells.iter().enumerate() {
        context.compile_cell(column, cell)?;
    }
    context.finish()
}

// =============================================================================
// Tag classification
// =============================================================================

/// What a single `#…` token declares.
#[derive(Debug, Clone, PartialEq, Eq)]
enum TagKind {
    Tags,
    Ignore,
    Table,
    /// `#%attr`
    Attribute(String),
    /// `#table.field%attr` or `#table%child.field%attr`
    Field {
        table: Option<String>,
        field: String,
        attribute: Option<String>,
        child: bool,
    },
}

fn classify(tag: &str) -> Result<TagKind, String> {
    let body = tag.strip_prefix('#').unwrap_or(tag);
    match body {
        "tags" => return Ok(TagKind::Tags),
        "ignore" => return Ok(TagKind::Ignore),
        "table" => return Ok(TagKind::Table),
        "" => return Err("empty tag '#'".to_string()),
        _ => {}
    }

    if let Some(attribute) = body.strip_prefix('%') {
        if attribute.is_empty() {
            return Err("attribute tag '#%' has no name".to_string());
        }
        return Ok(TagKind::Attribute(attribute.to_string()));
    }

    let (table, path, child) = match body.split_once('.') {
        Some((head, path)) => match head.strip_suffix("%child") {
            Some(table) => (table, path, true),
            None => (head, path, false),
        },
        None if body.ends_with("%child") => {
            return Err(format!("'{}' must be followed by '.<field>'", tag))
        }
        None => ("", body, false),
    };

    let (field, attribute) = match path.split_once('%') {
        Some((field, attribute)) if !attribute.is_empty() => (field, Some(attribute.to_string())),
        Some(_) => return Err(format!("attribute in '{}' has no name", tag)),
        None => (path, None),
    };
    if field.is_empty() {
        return Err(format!("tag '{}' has no field name", tag));
    }

    Ok(TagKind::Field {
        table: (!table.is_empty()).then(|| table.to_string()),
        field: field.to_string(),
        attribute,
        child,
    })
}

// =============================================================================
// Parser context
// =============================================================================

/// Where a declaration lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Constructor(usize),
    Global,
    PendingChild,
}

/// Most recent field declaration, for `#%attr`.
#[derive(Debug, Clone)]
struct LastField {
    target: Target,
    table: String,
    base: String,
}

/// An open `%child` declaration.
#[derive(Debug, Clone)]
struct ChildScope {
    table: String,
    /// Child constructor once its id is declared.
    constructor: Option<usize>,
    /// Non-id field declared before the id.
    pending: Option<FieldConstructor>,
}

/// A declaration parsed from one group of tokens.
struct Declaration {
    table: String,
    base: String,
    name: String,
    child: bool,
    target_hint: Option<Target>,
    list: bool,
}

/// Explicit parse state for one header row.
pub struct ParserContext<'s> {
    sheet: &'s Worksheet,
    row: usize,
    column: usize,
    last_table: Option<String>,
    last_field: Option<LastField>,
    constructors: Vec<RecordConstructor>,
    globals: Vec<(String, FieldConstructor)>,
    child: Option<ChildScope>,
}

struct Cursor<'t> {
    tokens: &'t [Token],
    pos: usize,
}

impl<'t> Cursor<'t> {
    fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<&'t Token> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }
}

impl<'s> ParserContext<'s> {
    pub fn new(sheet: &'s Worksheet, row: usize) -> Self {
        Self {
            sheet,
            row,
            column: 0,
            last_table: None,
            last_field: None,
            constructors: Vec::new(),
            globals: Vec::new(),
            child: None,
        }
    }

    fn location(&self) -> Location {
        self.sheet.location(self.row, self.column)
    }

    fn grammar(&self, message: impl Into<String>) -> TagError {
        TagError::grammar(self.location(), message)
    }

    fn structure(&self, message: impl Into<String>) -> TagError {
        TagError::structure(self.location(), message)
    }

    /// Compile one header cell.
    pub fn compile_cell(&mut self, column: usize, cell: &str) -> TagResult<()> {
        self.column = column;
        let tokens = tokenize(cell).map_err(|e| self.grammar(e.to_string()))?;
        let mut cursor = Cursor {
            tokens: &tokens,
            pos: 0,
        };

        if column == 0 {
            match cursor.next() {
                Some(Token::Tag(tag)) if tag == "#tags" => {}
                _ => return Err(self.grammar("a header row must start with '#tags' in column 0")),
            }
        }

        while let Some(token) = cursor.peek() {
            match token {
                Token::Semicolon | Token::Comma => {
                    cursor.next();
                }
                Token::Star => {
                    cursor.next();
                    match cursor.peek() {
                        Some(Token::Tag(tag)) => {
                            cursor.next();
                            self.declaration(tag, true, &mut cursor)?;
                        }
                        Some(other) if other.is_operator() => {
                            return Err(self.grammar(format!("two consecutive operators '*{}'", other)))
                        }
                        _ => return Err(self.grammar("'*' must immediately precede a field tag")),
                    }
                }
                Token::Equals | Token::Plus => {
                    return Err(self.grammar(format!("operator '{}' without a preceding field tag", token)))
                }
                Token::Literal(_) | Token::Regex(_) | Token::Word(_) => {
                    return Err(self.grammar(format!("operand '{}' without a field tag", token)))
                }
                Token::Tag(tag) => {
                    cursor.next();
                    self.declaration(tag, false, &mut cursor)?;
                }
            }
        }
        Ok(())
    }

    /// Handle a tag token at the start of a group.
    fn declaration(&mut self, tag: &str, list: bool, cursor: &mut Cursor<'_>) -> TagResult<()> {
        let kind = classify(tag).map_err(|m| self.grammar(m))?;

        let declaration = match kind {
            TagKind::Tags => return Err(self.grammar("'#tags' is only valid at the start of column 0")),
            TagKind::Ignore => return Err(self.grammar("'#ignore' is not valid inside a header row")),
            TagKind::Table => {
                if list {
                    return Err(self.grammar("'*' must precede a field tag, not '#table'"));
                }
                return self.table_directive(cursor);
            }
            TagKind::Attribute(attribute) => {
                let last = self
                    .last_field
                    .clone()
                    .ok_or_else(|| self.structure(format!("attribute '%{}' has no preceding field", attribute)))?;
                if last.target == Target::PendingChild {
                    return Err(self.structure("an attribute of a child field requires the child id to be declared first"));
                }
                Declaration {
                    name: format!("{}%{}", last.base, attribute),
                    table: last.table,
                    base: last.base,
                    child: false,
                    target_hint: Some(last.target),
                    list,
                }
            }
            TagKind::Field {
                table,
                field,
                attribute,
                child,
            } => {
                let table = self.resolve_table(table)?;
                let name = match &attribute {
                    Some(attribute) => format!("{}%{}", field, attribute),
                    None => field.clone(),
                };
                Declaration {
                    table,
                    base: field,
                    name,
                    child,
                    target_hint: None,
                    list,
                }
            }
        };

        let operands = match cursor.peek() {
            Some(Token::Equals) => {
                cursor.next();
                Some(self.assignment(cursor)?)
            }
            Some(Token::Plus) => return Err(self.grammar("'+' is only valid inside an assignment")),
            Some(Token::Star) | Some(Token::Tag(_)) | Some(Token::Semicolon) | Some(Token::Comma) | None => None,
            Some(other) => {
                return Err(self.grammar(format!(
                    "operand '{}' directly follows a field tag without '='",
                    other
                )))
            }
        };

        if declaration.list && declaration.name == ID_FIELD {
            return Err(self.structure("the id field cannot be list-valued"));
        }

        self.register(declaration, operands)
    }

    /// `#table=<name>`
    fn table_directive(&mut self, cursor: &mut Cursor<'_>) -> TagResult<()> {
        if !matches!(cursor.next(), Some(Token::Equals)) {
            return Err(self.grammar("'#table' must be followed by '=<name>'"));
        }
        match cursor.next() {
            Some(Token::Word(name)) | Some(Token::Literal(name)) if !name.is_empty() => {
                self.last_table = Some(name.clone());
                Ok(())
            }
            Some(other) if other.is_operator() => Err(self.grammar("two consecutive operators after '#table'")),
            _ => Err(self.grammar("'#table=' requires a table name")),
        }
    }

    /// Operands after `=`, joined by `+`.
    fn assignment(&mut self, cursor: &mut Cursor<'_>) -> TagResult<Vec<Operand>> {
        let mut operands = Vec::new();
        loop {
            match cursor.next() {
                Some(Token::Literal(text)) | Some(Token::Word(text)) => operands.push(Operand::Literal(text.clone())),
                Some(Token::Tag(tag)) => operands.push(self.reference_operand(tag)?),
                Some(Token::Regex(_)) => {
                    return Err(self.grammar("regular expressions are not valid assignment operands"))
                }
                Some(op) => return Err(self.grammar(format!("two consecutive operators before '{}'", op))),
                None => return Err(self.grammar("assignment operator without an operand")),
            }

            match cursor.peek() {
                Some(Token::Plus) => {
                    cursor.next();
                }
                Some(Token::Semicolon) | Some(Token::Comma) | None => return Ok(operands),
                Some(Token::Equals) | Some(Token::Star) => {
                    return Err(self.grammar("unexpected operator inside an assignment"))
                }
                Some(other) => {
                    return Err(self.grammar(format!(
                        "operand '{}' directly follows another operand",
                        other
                    )))
                }
            }
        }
    }

    fn reference_operand(&mut self, tag: &str) -> TagResult<Operand> {
        match classify(tag).map_err(|m| self.grammar(m))? {
            TagKind::Field {
                child: true, ..
            } => Err(self.grammar("child tags are not valid inside an assignment")),
            TagKind::Field {
                table,
                field,
                attribute,
                child: false,
            } => {
                let table = self.resolve_table(table)?;
                let field = match attribute {
                    Some(attribute) => format!("{}%{}", field, attribute),
                    None => field,
                };
                Ok(Operand::Field(FieldRef {
                    table,
                    field,
                    used_at: self.column,
                }))
            }
            TagKind::Attribute(attribute) => {
                let last = self
                    .last_field
                    .as_ref()
                    .ok_or_else(|| self.structure(format!("attribute '%{}' has no preceding field", attribute)))?;
                Ok(Operand::Field(FieldRef {
                    table: last.table.clone(),
                    field: format!("{}%{}", last.base, attribute),
                    used_at: self.column,
                }))
            }
            TagKind::Tags | TagKind::Table | TagKind::Ignore => {
                Err(self.grammar(format!("'{}' is not valid inside an assignment", tag)))
            }
        }
    }

    fn resolve_table(&self, table: Option<String>) -> TagResult<String> {
        table
            .or_else(|| self.last_table.clone())
            .ok_or_else(|| self.structure("field tag without a table and no preceding '#table'"))
    }

    fn constructor_for(&mut self, table: &str) -> usize {
        if let Some(index) = self
            .constructors
            .iter()
            .position(|c| c.table == table && !c.is_child())
        {
            return index;
        }
        self.constructors.push(RecordConstructor::new(table));
        self.constructors.len() - 1
    }

    fn register(&mut self, declaration: Declaration, operands: Option<Vec<Operand>>) -> TagResult<()> {
        let column = self.column;
        let field = match operands {
            Some(operands) => FieldConstructor::assigned(declaration.name.clone(), operands, declaration.list, column),
            None if column == 0 => {
                return Err(self.grammar("fields declared in column 0 must be assigned a literal"))
            }
            None => FieldConstructor::column(declaration.name.clone(), column, declaration.list),
        };

        let target = if column == 0 {
            if !field.is_literal() {
                return Err(self.grammar("fields declared in column 0 may only use literal operands"));
            }
            if declaration.child {
                return Err(self.grammar("child tags are not valid in column 0"));
            }
            self.globals.push((declaration.table.clone(), field));
            Target::Global
        } else if let Some(target) = declaration.target_hint {
            match target {
                Target::Constructor(index) => {
                    self.add_to(index, field)?;
                    target
                }
                Target::Global => return Err(self.grammar("attributes of column-0 fields are not supported")),
                Target::PendingChild => {
                    return Err(self.structure("attribute of a child field declared before the child id"))
                }
            }
        } else if declaration.child {
            self.register_child(&declaration.table, field)?
        } else {
            let index = self.constructor_for(&declaration.table);
            self.add_to(index, field)?;
            Target::Constructor(index)
        };

        self.last_table = Some(declaration.table.clone());
        self.last_field = Some(LastField {
            target,
            table: declaration.table,
            base: declaration.base,
        });
        Ok(())
    }

    fn add_to(&mut self, index: usize, field: FieldConstructor) -> TagResult<()> {
        let result = self.constructors[index].add_field(field);
        result.map_err(|m| self.structure(m))
    }

    fn register_child(&mut self, table: &str, field: FieldConstructor) -> TagResult<Target> {
        let is_id = field.name == ID_FIELD;

        if let Some(scope) = &self.child {
            if scope.table != table && scope.pending.is_some() {
                return Err(self.structure("child field declared without a preceding child id field"));
            }
        }
        if self.child.as_ref().map_or(true, |scope| scope.table != table) {
            self.child = Some(ChildScope {
                table: table.to_string(),
                constructor: None,
                pending: None,
            });
        }

        if is_id {
            let parent = self
                .constructors
                .iter()
                .position(|c| c.table == table && !c.is_child())
                .ok_or_else(|| self.structure(format!("child of '{}' declared without a parent record", table)))?;
            let mut child = RecordConstructor::child_of(&self.constructors[parent], parent)
                .ok_or_else(|| self.structure(format!("child of '{}' declared before the parent id", table)))?;
            child.add_field(field).map_err(|m| self.structure(m))?;

            let pending = self.child.as_mut().and_then(|scope| scope.pending.take());
            if let Some(pending) = pending {
                child.add_field(pending).map_err(|m| self.structure(m))?;
            }

            self.constructors.push(child);
            let index = self.constructors.len() - 1;
            if let Some(scope) = self.child.as_mut() {
                scope.constructor = Some(index);
            }
            return Ok(Target::Constructor(index));
        }

        let (constructor, has_pending) = match &self.child {
            Some(scope) => (scope.constructor, scope.pending.is_some()),
            None => (None, false),
        };
        match constructor {
            Some(index) => {
                self.add_to(index, field)?;
                Ok(Target::Constructor(index))
            }
            None if has_pending => Err(self.structure("two explicit non-id child fields declared before the child id")),
            None => {
                if let Some(scope) = self.child.as_mut() {
                    scope.pending = Some(field);
                }
                Ok(Target::PendingChild)
            }
        }
    }

    /// Resolve references, apply globals and validate ids.
    pub fn finish(mut self) -> TagResult<Vec<RecordConstructor>> {
        if let Some(pending) = self.child.as_ref().and_then(|scope| scope.pending.as_ref()) {
            self.column = pending.column;
            return Err(self.structure("child field declared without a preceding child id field"));
        }

        // Globals reach every record; foreign tables keep the `table.` prefix.
        let globals = std::mem::take(&mut self.globals);
        for constructor in &mut self.constructors {
            for (table, global) in &globals {
                let mut field = global.clone();
                if &constructor.table != table {
                    field.name = format!("{}.{}", table, global.name);
                }
                constructor.add_default(field);
            }
        }

        self.resolve_references(&globals)?;

        for constructor in &self.constructors {
            if !constructor.has_id() {
                let column = constructor.fields.first().map(|f| f.column).unwrap_or(0);
                return Err(TagError::structure(
                    self.sheet.location(self.row, column),
                    format!("no id field declared for table '{}'", constructor.table),
                ));
            }
        }

        Ok(self.constructors)
    }

    fn resolve_references(&mut self, globals: &[(String, FieldConstructor)]) -> TagResult<()> {
        let mut sources: Vec<(String, String, Operand)> = Vec::new();
        for (table, global) in globals {
            if let [Operand::Literal(text)] = global.operands.as_slice() {
                sources.push((table.clone(), global.name.clone(), Operand::Literal(text.clone())));
            }
        }
        for constructor in self.constructors.iter().filter(|c| !c.is_child()) {
            for field in &constructor.fields {
                if let Some(column) = field.source_column() {
                    sources.push((constructor.table.clone(), field.name.clone(), Operand::Column(column)));
                } else if let [Operand::Literal(text)] = field.operands.as_slice() {
                    sources.push((constructor.table.clone(), field.name.clone(), Operand::Literal(text.clone())));
                }
            }
        }

        for constructor in &mut self.constructors {
            for field in &mut constructor.fields {
                for operand in &mut field.operands {
                    let Operand::Field(reference) = operand else {
                        continue;
                    };
                    let resolved = sources
                        .iter()
                        .find(|(table, name, _)| *table == reference.table && *name == reference.field)
                        .map(|(_, _, source)| source.clone());
                    match resolved {
                        Some(source) => *operand = source,
                        None => {
                            return Err(TagError::structure(
                                self.sheet.location(self.row, reference.used_at),
                                format!(
                                    "'#{}.{}' does not refer to a column-sourced field of this header",
                                    reference.table, reference.field
                                ),
                            ))
                        }
                    }
                }
            }
        }
        Ok(())
    }
}
