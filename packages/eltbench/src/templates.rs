//! Throwaway-script templates for warehouse access.
//!
//! The controller never holds a warehouse connection. Each SQL or catalog
//! action is compiled into a short Python script from one of these templates,
//! executed as a subprocess, and the script is deleted afterwards. A fresh
//! connection per invocation trades overhead for isolation: a failed query
//! cannot corrupt a later action's session.
//!
//! Substitution is plain token replacement on `{name}` markers; the scripts
//! read their credentials (`snowflake_credential.json`,
//! `bigquery_credential.json`) from the working directory themselves.

use crate::action::Warehouse;

fn fill(template: &str, substitutions: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in substitutions {
        out = out.replace(&format!("{{{key}}}"), value);
    }
    out
}

const SF_EXEC_SQL: &str = r#"
import json
import os
import sys

import pandas as pd
import snowflake.connector

creds = json.load(open("./snowflake_credential.json"))
conn = snowflake.connector.connect(**creds)
cursor = conn.cursor()

sql_query = """{sql_query}"""
save_path = os.path.join(".", "{save_path}".lstrip("/"))

try:
    cursor.execute(sql_query)
    rows = cursor.fetchall()
    columns = [desc[0] for desc in cursor.description]
    df = pd.DataFrame(rows, columns=columns)
    if df.empty:
        print("No data found for the specified query.")
    elif {is_save}:
        df.to_csv(save_path, index=False)
        print("Results saved to %s" % save_path)
    else:
        print(df)
except Exception as e:
    print("Error: ", e)
    sys.exit(1)
finally:
    cursor.close()
    conn.close()
"#;

const BQ_EXEC_SQL: &str = r#"
import os
import sys

import pandas as pd
from google.cloud import bigquery

os.environ["GOOGLE_APPLICATION_CREDENTIALS"] = "./bigquery_credential.json"
client = bigquery.Client()

sql_query = """{sql_query}"""
save_path = os.path.join(".", "{save_path}".lstrip("/"))

try:
    df = client.query(sql_query).result().to_dataframe()
    if df.empty:
        print("No data found for the specified query.")
    elif {is_save}:
        df.to_csv(save_path, index=False)
        print("Results saved to %s" % save_path)
    else:
        print(df)
except Exception as e:
    print("Error: ", e)
    sys.exit(1)
"#;

const SF_GET_TABLES: &str = r#"
import json
import os
import sys

import pandas as pd
import snowflake.connector

creds = json.load(open("./snowflake_credential.json"))
conn = snowflake.connector.connect(**creds)
cursor = conn.cursor()

query = """
SELECT table_name, comment
FROM "{database_name}".INFORMATION_SCHEMA.TABLES
WHERE table_schema = '{schema_name}'
"""
save_path = os.path.join(".", "{save_path}".lstrip("/"))

try:
    cursor.execute(query)
    df = pd.DataFrame(cursor.fetchall(), columns=["table_name", "description"])
    df.to_csv(save_path, index=False)
    print("Results saved to %s" % save_path)
except Exception as e:
    print("Error: ", e)
    sys.exit(1)
finally:
    cursor.close()
    conn.close()
"#;

const SF_GET_TABLE_INFO: &str = r#"
import json
import os
import sys

import pandas as pd
import snowflake.connector

creds = json.load(open("./snowflake_credential.json"))
conn = snowflake.connector.connect(**creds)
cursor = conn.cursor()

query = """
SELECT column_name, data_type, comment
FROM "{database_name}".INFORMATION_SCHEMA.COLUMNS
WHERE table_schema = '{schema_name}' AND table_name = '{table}'
"""
save_path = os.path.join(".", "{save_path}".lstrip("/"))

try:
    cursor.execute(query)
    df = pd.DataFrame(cursor.fetchall(), columns=["column_name", "data_type", "description"])
    if df.empty:
        print("No data found for the specified query.")
    else:
        df.to_csv(save_path, index=False)
        print("Results saved to %s" % save_path)
except Exception as e:
    print("Error: ", e)
    sys.exit(1)
finally:
    cursor.close()
    conn.close()
"#;

const SF_SAMPLE_ROWS: &str = r#"
import json
import os
import sys

import pandas as pd
import snowflake.connector

creds = json.load(open("./snowflake_credential.json"))
conn = snowflake.connector.connect(**creds)
cursor = conn.cursor()

query = """
SELECT *
FROM "{database_name}"."{schema_name}"."{table}"
TABLESAMPLE BERNOULLI (1)
LIMIT {row_number}
"""
save_path = os.path.join(".", "{save_path}".lstrip("/"))

try:
    cursor.execute(query)
    cols = [desc[0] for desc in cursor.description]
    df = pd.DataFrame(cursor.fetchall(), columns=cols)
    with open(save_path, "w") as fh:
        fh.write(json.dumps(df.to_dict(orient="records"), indent=4, default=str))
    print("Sample rows saved to %s" % save_path)
except Exception as e:
    print("Error: ", e)
    sys.exit(1)
finally:
    cursor.close()
    conn.close()
"#;

const BQ_GET_TABLES: &str = r#"
import os
import sys

from google.cloud import bigquery

os.environ["GOOGLE_APPLICATION_CREDENTIALS"] = "./bigquery_credential.json"
client = bigquery.Client()

query = """
SELECT table_name, ddl
FROM `{database_name}.{dataset_name}.INFORMATION_SCHEMA.TABLES`
WHERE table_type != 'VIEW'
"""
save_path = os.path.join(".", "{save_path}".lstrip("/"))

try:
    df = client.query(query).result().to_dataframe()
    if df.empty:
        print("No data found for the specified query.")
    else:
        df.to_csv(save_path, index=False)
        print("Results saved to %s" % save_path)
except Exception as e:
    print("Error: ", e)
    sys.exit(1)
"#;

const BQ_GET_TABLE_INFO: &str = r#"
import os
import sys

from google.cloud import bigquery

os.environ["GOOGLE_APPLICATION_CREDENTIALS"] = "./bigquery_credential.json"
client = bigquery.Client()

query = """
SELECT field_path, data_type, description
FROM `{database_name}.{dataset_name}.INFORMATION_SCHEMA.COLUMN_FIELD_PATHS`
WHERE table_name = '{table}'
"""
save_path = os.path.join(".", "{save_path}".lstrip("/"))

try:
    df = client.query(query).result().to_dataframe()
    if df.empty:
        print("No data found for the specified query.")
    else:
        df.to_csv(save_path, index=False)
        print("Results saved to %s" % save_path)
except Exception as e:
    print("Error: ", e)
    sys.exit(1)
"#;

const BQ_SAMPLE_ROWS: &str = r#"
import json
import os
import sys

from google.cloud import bigquery

os.environ["GOOGLE_APPLICATION_CREDENTIALS"] = "./bigquery_credential.json"
client = bigquery.Client()

query = """
SELECT *
FROM `{database_name}.{dataset_name}.{table}`
TABLESAMPLE SYSTEM (0.0001 PERCENT)
LIMIT {row_number}
"""
save_path = os.path.join(".", "{save_path}".lstrip("/"))

try:
    df = client.query(query).result().to_dataframe()
    with open(save_path, "w") as fh:
        fh.write(json.dumps(df.to_dict(orient="records"), indent=4, default=str))
    print("Sample rows saved to %s" % save_path)
except Exception as e:
    print("Error: ", e)
    sys.exit(1)
"#;

const LOCAL_SQL: &str = r#"
import os
import sqlite3
import sys

import pandas as pd

def open_connection(path):
    if path.endswith(".duckdb"):
        import duckdb
        return duckdb.connect(database=path, read_only=True)
    return sqlite3.connect(path)

file_path = os.path.join(".", "{file_path}".lstrip("/"))
output_path = os.path.join(".", "{output_path}".lstrip("/"))
command = """{sql_command}"""

if not os.path.exists(file_path):
    print("ERROR: Database file not found: %s" % file_path)
    sys.exit(1)

conn = open_connection(file_path)
try:
    df = pd.read_sql_query(command, conn)
    if output_path.lower().endswith(".csv"):
        df.to_csv(output_path, index=False)
        print("Output saved to: %s" % output_path)
    else:
        print(df)
except Exception as e:
    print("ERROR: %s" % e)
    sys.exit(1)
finally:
    conn.close()
"#;

const SF_RUN_SQL: &str = r#"
import json
import sys

import snowflake.connector

creds = json.load(open("{creds_path}"))
conn = snowflake.connector.connect(**creds)
cursor = conn.cursor()

try:
{use_statements}
    cursor.execute("""{sql_query}""")
    try:
        print(cursor.fetchall())
    except Exception:
        print("OK")
except Exception as e:
    print("Error: ", e)
    sys.exit(1)
finally:
    cursor.close()
    conn.close()
"#;

const SF_CATALOG: &str = r#"
import json
import sys

import snowflake.connector

creds = json.load(open("{creds_path}"))
conn = snowflake.connector.connect(**creds)
cursor = conn.cursor()

try:
{use_statements}
    cursor.execute("SELECT CURRENT_SCHEMA()")
    (active_schema,) = cursor.fetchone()
    if not active_schema:
        cursor.execute("USE SCHEMA PUBLIC")
        active_schema = "PUBLIC"
    cursor.execute(
        "SELECT table_name, column_name, data_type "
        "FROM information_schema.columns WHERE table_schema = %s "
        "ORDER BY table_name, ordinal_position",
        (active_schema,),
    )
    for table, column, dtype in cursor.fetchall():
        print("%s\t%s\t%s" % (table, column, dtype))
except Exception as e:
    print("Error: ", e)
    sys.exit(1)
finally:
    cursor.close()
    conn.close()
"#;

pub fn exec_sql_script(warehouse: Warehouse, query: &str, save: bool, save_path: &str) -> String {
    let template = match warehouse {
        Warehouse::Snowflake => SF_EXEC_SQL,
        Warehouse::BigQuery => BQ_EXEC_SQL,
    };
    fill(
        template,
        &[
            ("sql_query", query),
            ("is_save", if save { "True" } else { "False" }),
            ("save_path", save_path),
        ],
    )
}

pub fn get_tables_script(warehouse: Warehouse, database: &str, schema: &str, save_path: &str) -> String {
    match warehouse {
        Warehouse::Snowflake => fill(
            SF_GET_TABLES,
            &[
                ("database_name", database),
                ("schema_name", schema),
                ("save_path", save_path),
            ],
        ),
        Warehouse::BigQuery => fill(
            BQ_GET_TABLES,
            &[
                ("database_name", database),
                ("dataset_name", schema),
                ("save_path", save_path),
            ],
        ),
    }
}

pub fn table_info_script(
    warehouse: Warehouse,
    database: &str,
    schema: &str,
    table: &str,
    save_path: &str,
) -> String {
    match warehouse {
        Warehouse::Snowflake => fill(
            SF_GET_TABLE_INFO,
            &[
                ("database_name", database),
                ("schema_name", schema),
                ("table", table),
                ("save_path", save_path),
            ],
        ),
        Warehouse::BigQuery => fill(
            BQ_GET_TABLE_INFO,
            &[
                ("database_name", database),
                ("dataset_name", schema),
                ("table", table),
                ("save_path", save_path),
            ],
        ),
    }
}

pub fn sample_rows_script(
    warehouse: Warehouse,
    database: &str,
    schema: &str,
    table: &str,
    rows: u32,
    save_path: &str,
) -> String {
    let rows = rows.to_string();
    match warehouse {
        Warehouse::Snowflake => fill(
            SF_SAMPLE_ROWS,
            &[
                ("database_name", database),
                ("schema_name", schema),
                ("table", table),
                ("row_number", &rows),
                ("save_path", save_path),
            ],
        ),
        Warehouse::BigQuery => fill(
            BQ_SAMPLE_ROWS,
            &[
                ("database_name", database),
                ("dataset_name", schema),
                ("table", table),
                ("row_number", &rows),
                ("save_path", save_path),
            ],
        ),
    }
}

pub fn local_sql_script(file_path: &str, query: &str, output_path: &str) -> String {
    fill(
        LOCAL_SQL,
        &[
            ("file_path", file_path),
            ("sql_command", query),
            ("output_path", output_path),
        ],
    )
}

fn use_statements(database: Option<&str>, schema: Option<&str>) -> String {
    let mut lines = Vec::new();
    if let Some(database) = database {
        lines.push(format!("    cursor.execute(\"USE DATABASE {database}\")"));
    }
    if let Some(schema) = schema {
        lines.push(format!("    cursor.execute(\"USE SCHEMA {schema}\")"));
    }
    if lines.is_empty() {
        lines.push("    pass".to_string());
    }
    lines.join("\n")
}

/// Script for the SQL-of-Thought execute step: sets session context, runs one
/// statement, prints rows (or `OK`), exits non-zero on any error.
pub fn run_sql_script(query: &str, creds_path: &str, database: Option<&str>, schema: Option<&str>) -> String {
    fill(
        SF_RUN_SQL,
        &[
            ("creds_path", creds_path),
            ("use_statements", &use_statements(database, schema)),
            ("sql_query", query),
        ],
    )
}

/// Script that dumps the active schema's catalog as `table\tcolumn\ttype`
/// lines on stdout.
pub fn catalog_script(creds_path: &str, database: Option<&str>, schema: Option<&str>) -> String {
    fill(
        SF_CATALOG,
        &[
            ("creds_path", creds_path),
            ("use_statements", &use_statements(database, schema)),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exec_sql_substitutes_all_tokens() {
        let script = exec_sql_script(Warehouse::Snowflake, "SELECT 1", true, "out.csv");
        assert!(script.contains(r#"sql_query = """SELECT 1""""#));
        assert!(script.contains("elif True:"));
        assert!(script.contains(r#""out.csv".lstrip("/")"#));
        assert!(!script.contains("{sql_query}"));
    }

    #[test]
    fn run_sql_sets_session_context() {
        let script = run_sql_script("SELECT 1", "./creds.json", Some("DB"), Some("PUBLIC"));
        assert!(script.contains("USE DATABASE DB"));
        assert!(script.contains("USE SCHEMA PUBLIC"));
    }

    #[test]
    fn run_sql_without_context_is_valid_python_block() {
        let script = run_sql_script("SELECT 1", "./creds.json", None, None);
        assert!(script.contains("    pass\n"));
    }

    #[test]
    fn local_script_detects_duckdb() {
        let script = local_sql_script("data.duckdb", "SELECT 1", "out.csv");
        assert!(script.contains("duckdb.connect"));
        assert!(script.contains(r#""data.duckdb".lstrip("/")"#));
    }
}
