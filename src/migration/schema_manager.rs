//! SchemaManager - renders migration operations to PostgreSQL DDL and runs them
//!
//! Tables, columns, indexes and foreign keys are built with sea-query's
//! statement builders and rendered with `PostgresQueryBuilder`. Named
//! primary key, unique and check constraints have no sea-query `ALTER`
//! form and are written out directly with quoted identifiers.

use super::operation::MigrationOperation;
use crate::error::ExecutionError;
use crate::executor::Executor;
use crate::query::quote_ident;
use crate::schema::{Column, ColumnType, Constraint, Index as IndexDef, OnDelete, Table as TableDef};
use crate::value::Value;
use sea_query::{ColumnDef, Expr, ForeignKey, ForeignKeyAction, Index, PostgresQueryBuilder, Table};

/// SchemaManager runs migration operations against an executor
///
/// Each operation renders to one or more statements, executed in order.
/// DDL takes no parameters; default values are rendered as literals.
pub struct SchemaManager<'a> {
    executor: &'a dyn Executor,
}

impl<'a> SchemaManager<'a> {
    pub fn new(executor: &'a dyn Executor) -> Self {
        Self { executor }
    }

    /// Run every statement of `operation`, stopping at the first failure
    pub fn run(&self, operation: &MigrationOperation) -> Result<(), ExecutionError> {
        for sql in render(operation) {
            log::debug!("{sql}");
            self.executor.execute(&sql, &[])?;
        }
        Ok(())
    }

    /// Get a reference to the underlying executor
    pub fn executor(&self) -> &'a dyn Executor {
        self.executor
    }
}

/// Render `operation` to the DDL statements that perform it.
pub fn render(operation: &MigrationOperation) -> Vec<String> {
    match operation {
        MigrationOperation::CreateTable { table } => create_table(table),
        MigrationOperation::DropTable { table } => {
            vec![Table::drop().table(table.name.clone()).to_owned().build(PostgresQueryBuilder)]
        }
        MigrationOperation::AddColumn { table, column, .. } => {
            let alter = Table::alter()
                .table(table.to_string())
                .add_column(column_def(column, false))
                .to_owned();
            vec![alter.build(PostgresQueryBuilder)]
        }
        MigrationOperation::DropColumn { table, column, .. } => {
            let alter = Table::alter()
                .table(table.to_string())
                .drop_column(column.name.clone())
                .to_owned();
            vec![alter.build(PostgresQueryBuilder)]
        }
        MigrationOperation::AlterColumn { table, from, to, .. } => alter_column(table, from, to),
        MigrationOperation::AddConstraint { table, constraint } => {
            vec![add_constraint(table, constraint)]
        }
        MigrationOperation::DropConstraint { table, constraint } => {
            vec![drop_constraint(table, constraint)]
        }
        MigrationOperation::CreateIndex { table, index } => vec![create_index(table, index)],
        MigrationOperation::DropIndex { table, index } => vec![Index::drop()
            .name(index.name.clone())
            .table(table.to_string())
            .to_owned()
            .build(PostgresQueryBuilder)],
        MigrationOperation::Rename {
            table,
            column: None,
            to,
        } => vec![Table::rename()
            .table(table.to_string(), to.to_string())
            .to_owned()
            .build(PostgresQueryBuilder)],
        MigrationOperation::Rename {
            table,
            column: Some(column),
            to,
        } => {
            let alter = Table::alter()
                .table(table.to_string())
                .rename_column(column.to_string(), to.to_string())
                .to_owned();
            vec![alter.build(PostgresQueryBuilder)]
        }
    }
}

fn create_table(table: &TableDef) -> Vec<String> {
    // A lone integer primary key is generated by the database
    let serial = table
        .primary_key_column()
        .filter(|pk| table.get_column(pk).is_some_and(|c| c.column_type == ColumnType::Integer));

    let mut create = Table::create();
    create.table(table.name.clone());
    for column in &table.columns {
        create.col(column_def(column, serial == Some(column.name.as_str())));
    }

    let mut statements = vec![create.to_owned().build(PostgresQueryBuilder)];
    let (foreign_keys, others): (Vec<&Constraint>, Vec<&Constraint>) =
        table.constraints.iter().partition(|c| c.is_foreign_key());
    statements.extend(others.into_iter().map(|c| add_constraint(&table.name, c)));
    statements.extend(foreign_keys.into_iter().map(|c| add_constraint(&table.name, c)));
    statements.extend(table.indexes.iter().map(|i| create_index(&table.name, i)));
    statements
}

fn column_def(column: &Column, auto_increment: bool) -> ColumnDef {
    let mut def = ColumnDef::new(column.name.clone());
    apply_column_type(&mut def, &column.column_type);
    if auto_increment {
        def.auto_increment();
    }
    if column.nullable {
        def.null();
    } else {
        def.not_null();
    }
    if let Some(default) = column.default.as_ref().and_then(literal) {
        def.default(default);
    }
    def
}

fn apply_column_type(def: &mut ColumnDef, column_type: &ColumnType) {
    match column_type {
        ColumnType::Integer | ColumnType::Reference { .. } => def.big_integer(),
        ColumnType::Float => def.double(),
        ColumnType::Boolean => def.boolean(),
        ColumnType::Text => def.text(),
        ColumnType::Date => def.date(),
        ColumnType::DateTime => def.timestamp(),
        ColumnType::Binary => def.binary(),
        ColumnType::Decimal => def.decimal(),
    };
}

/// A default value as a sea-query value; `None` for SQL NULL.
fn literal(value: &Value) -> Option<sea_query::Value> {
    Some(match value {
        Value::Null => return None,
        Value::Bool(b) => (*b).into(),
        Value::Int(i) => (*i).into(),
        Value::Float(f) => (*f).into(),
        Value::Decimal(d) => (*d).into(),
        Value::Text(s) => s.clone().into(),
        Value::Date(d) => (*d).into(),
        Value::DateTime(dt) => (*dt).into(),
        Value::Bytes(b) => b.clone().into(),
    })
}

fn alter_column(table: &str, from: &Column, to: &Column) -> Vec<String> {
    let mut statements = Vec::new();
    if from.column_type != to.column_type
        || from.nullable != to.nullable
        || (from.default != to.default && to.default.as_ref().is_some_and(|d| !d.is_null()))
    {
        let alter = Table::alter()
            .table(table.to_string())
            .modify_column(column_def(to, false))
            .to_owned();
        statements.push(alter.build(PostgresQueryBuilder));
    }
    let had_default = from.default.as_ref().is_some_and(|d| !d.is_null());
    let has_default = to.default.as_ref().is_some_and(|d| !d.is_null());
    if had_default && !has_default {
        statements.push(format!(
            "ALTER TABLE {} ALTER COLUMN {} DROP DEFAULT",
            quote_ident(table),
            quote_ident(&to.name)
        ));
    }
    statements
}

fn foreign_key_action(on_delete: OnDelete) -> ForeignKeyAction {
    match on_delete {
        OnDelete::Cascade => ForeignKeyAction::Cascade,
        OnDelete::SetNull => ForeignKeyAction::SetNull,
        OnDelete::SetDefault => ForeignKeyAction::SetDefault,
        OnDelete::Protect => ForeignKeyAction::Restrict,
        OnDelete::NoAction => ForeignKeyAction::NoAction,
    }
}

fn column_list(columns: &[String]) -> String {
    columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", ")
}

fn add_constraint(table: &str, constraint: &Constraint) -> String {
    let body = match constraint {
        Constraint::ForeignKey {
            name,
            column,
            references_table,
            references_column,
            on_delete,
        } => {
            return ForeignKey::create()
                .name(name.clone())
                .from(table.to_string(), column.clone())
                .to(references_table.clone(), references_column.clone())
                .on_delete(foreign_key_action(*on_delete))
                .to_owned()
                .build(PostgresQueryBuilder);
        }
        Constraint::PrimaryKey { columns, .. } => format!("PRIMARY KEY ({})", column_list(columns)),
        Constraint::Unique { columns, .. } => format!("UNIQUE ({})", column_list(columns)),
        Constraint::Check { expression, .. } => format!("CHECK ({expression})"),
    };
    format!(
        "ALTER TABLE {} ADD CONSTRAINT {} {body}",
        quote_ident(table),
        quote_ident(constraint.name())
    )
}

fn drop_constraint(table: &str, constraint: &Constraint) -> String {
    if constraint.is_foreign_key() {
        return ForeignKey::drop()
            .name(constraint.name().to_string())
            .table(table.to_string())
            .to_owned()
            .build(PostgresQueryBuilder);
    }
    format!(
        "ALTER TABLE {} DROP CONSTRAINT {}",
        quote_ident(table),
        quote_ident(constraint.name())
    )
}

fn create_index(table: &str, index: &IndexDef) -> String {
    let mut create = Index::create();
    create.name(index.name.clone()).table(table.to_string());
    for column in &index.columns {
        create.col(Expr::col(column.clone()));
    }
    if index.unique {
        create.unique();
    }
    create.to_owned().build(PostgresQueryBuilder)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockConnection;

    fn book() -> TableDef {
        TableDef::new("book")
            .column(Column::integer("id"))
            .column(Column::text("title").default_value("untitled"))
            .column(Column::reference("author_id", "author", "id"))
            .primary_key(&["id"])
            .foreign_key("author_id", "author", "id", OnDelete::Cascade)
            .index("book_title_idx", &["title"], false)
    }

    #[test]
    fn test_create_table_statements() {
        let statements = render(&MigrationOperation::CreateTable { table: book() });
        assert_eq!(statements.len(), 4);
        assert!(statements[0].starts_with(r#"CREATE TABLE "book""#));
        assert!(statements[0].contains(r#""author_id" bigint NOT NULL"#));
        assert!(statements[0].contains("'untitled'"));
        assert_eq!(
            statements[1],
            r#"ALTER TABLE "book" ADD CONSTRAINT "book_pkey" PRIMARY KEY ("id")"#
        );
        assert!(statements[2].contains(r#"FOREIGN KEY ("author_id") REFERENCES "author" ("id")"#));
        assert!(statements[2].contains("ON DELETE CASCADE"));
        assert!(statements[3].contains(r#""book_title_idx""#));
    }

    #[test]
    fn test_protect_renders_restrict() {
        let fk = Constraint::ForeignKey {
            name: "book_author_id_fkey".into(),
            column: "author_id".into(),
            references_table: "author".into(),
            references_column: "id".into(),
            on_delete: OnDelete::Protect,
        };
        let sql = add_constraint("book", &fk);
        assert!(sql.starts_with(r#"ALTER TABLE "book" ADD CONSTRAINT "book_author_id_fkey""#));
        assert!(sql.contains("ON DELETE RESTRICT"));
        assert!(drop_constraint("book", &fk).contains(r#"DROP CONSTRAINT "book_author_id_fkey""#));
    }

    #[test]
    fn test_identifiers_are_quoted() {
        let unique = Constraint::Unique {
            name: "odd\"name".into(),
            columns: vec!["a".into(), "b".into()],
        };
        assert_eq!(
            add_constraint("t", &unique),
            r#"ALTER TABLE "t" ADD CONSTRAINT "odd""name" UNIQUE ("a", "b")"#
        );
    }

    #[test]
    fn test_column_statements() {
        let add = render(&MigrationOperation::AddColumn {
            table: "author".into(),
            column: Column::date("born").nullable(),
            position: None,
        });
        assert_eq!(add.len(), 1);
        assert!(add[0].starts_with(r#"ALTER TABLE "author" ADD COLUMN "born" date"#));

        let rename = render(&MigrationOperation::Rename {
            table: "author".into(),
            column: Some("name".into()),
            to: "full_name".into(),
        });
        assert_eq!(rename, vec![r#"ALTER TABLE "author" RENAME COLUMN "name" TO "full_name""#]);

        let drop = render(&MigrationOperation::DropColumn {
            table: "author".into(),
            column: Column::date("born"),
            position: Some(2),
        });
        assert_eq!(drop, vec![r#"ALTER TABLE "author" DROP COLUMN "born""#]);
    }

    #[test]
    fn test_alter_column_drops_default() {
        let from = Column::text("title").default_value("untitled");
        let to = Column::text("title");
        let statements = alter_column("book", &from, &to);
        assert_eq!(
            statements,
            vec![r#"ALTER TABLE "book" ALTER COLUMN "title" DROP DEFAULT"#]
        );

        let widen = alter_column("book", &to, &Column::text("title").nullable());
        assert_eq!(widen.len(), 1);
        assert!(widen[0].contains(r#"ALTER COLUMN "title""#));
    }

    #[test]
    fn test_run_executes_in_order() {
        let conn = MockConnection::new();
        let manager = SchemaManager::new(&conn);
        manager.run(&MigrationOperation::CreateTable { table: book() }).unwrap();
        let statements = conn.statements();
        assert_eq!(statements.len(), 4);
        assert!(statements[0].starts_with("CREATE TABLE"));
    }

    #[test]
    fn test_run_stops_at_failure() {
        let conn = MockConnection::new();
        conn.fail_on("PRIMARY KEY", "multiple primary keys");
        let manager = SchemaManager::new(&conn);
        assert!(manager.run(&MigrationOperation::CreateTable { table: book() }).is_err());
        assert_eq!(conn.statements().len(), 2);
    }
}
