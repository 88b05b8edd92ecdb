//! CLI Models Command
//!
//! Lists the model catalog.

use edgechat_engine::ModelCatalog;

use crate::terminal_output::{render_table, styled, Column, BOLD};

/// Render the catalog as a table; `current` is marked with `*`.
pub fn render(catalog: &ModelCatalog, current: &str) -> String {
    let columns = vec![
        Column::left(""),
        Column::left("Id"),
        Column::left("Name"),
        Column::left("Backend"),
        Column::right("Context"),
        Column::left("Weights").max_width(48),
    ];
    let rows: Vec<Vec<String>> = catalog
        .list()
        .into_iter()
        .map(|m| {
            vec![
                if m.id == current { "*".to_string() } else { String::new() },
                m.id.clone(),
                m.display_name.clone(),
                m.preferred_backend
                    .map(|b| format!("{b:?}").to_lowercase())
                    .unwrap_or_else(|| "-".to_string()),
                m.context_tokens.to_string(),
                m.path.clone(),
            ]
        })
        .collect();
    render_table(&columns, &rows)
}

pub fn run(catalog: &ModelCatalog, current: &str) {
    println!("\n{}\n", styled(BOLD, "Models"));
    print!("{}", render(catalog, current));
    println!();
}
