use crate::output;
use crate::registers::{REGISTER_SCHEMA, RegisterSchema};

/// List and search the known Topvex Access registers.
#[derive(clap::Parser)]
pub struct Args {
    /// Case-insensitive substring matched against names, descriptions and
    /// addresses.
    filter: Option<String>,
    #[clap(flatten)]
    output: output::Args,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Output(#[from] output::Error),
}

fn is_match(schema: &RegisterSchema, pattern: &str) -> bool {
    let pattern = pattern.to_uppercase();
    schema.name.contains(&pattern)
        || schema.description.to_uppercase().contains(&pattern)
        || schema.address.to_string().contains(&pattern)
}

pub fn run(args: Args) -> Result<(), Error> {
    let mut output = args.output.to_output()?;
    output.table_headers(vec!["Class", "Address", "Name", "Type", "Description"])?;
    for schema in REGISTER_SCHEMA {
        if let Some(pattern) = &args.filter
            && !is_match(schema, pattern)
        {
            continue;
        }
        output.result(
            || {
                vec![
                    schema.class.to_string(),
                    schema.address.to_string(),
                    schema.name.to_string(),
                    schema.data_type.to_string(),
                    schema.description.to_string(),
                ]
            },
            || schema,
        )?;
    }
    Ok(output.commit()?)
}
