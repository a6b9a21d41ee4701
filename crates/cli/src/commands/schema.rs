use tabletalk_agent::load_schemas;
use tabletalk_core::config::LoadOptions;

use crate::commands::{load_config, CommandResult};

pub fn run(options: LoadOptions, json: bool) -> CommandResult {
    let config = match load_config("schema", options) {
        Ok(config) => config,
        Err(result) => return result,
    };
    let schemas = match load_schemas(&config.schema) {
        Ok(schemas) => schemas,
        Err(error) => {
            return CommandResult::failure("schema", "schema_load", format!("{error:#}"), 3)
        }
    };

    if !json {
        return CommandResult { exit_code: 0, output: schemas.schema_summary() };
    }

    let entities = schemas
        .entity_types()
        .iter()
        .filter_map(|name| schemas.schema_for(name).cloned())
        .collect::<Vec<_>>();
    match serde_json::to_string_pretty(&entities) {
        Ok(output) => CommandResult { exit_code: 0, output },
        Err(error) => CommandResult::failure("schema", "serialization", error.to_string(), 1),
    }
}
