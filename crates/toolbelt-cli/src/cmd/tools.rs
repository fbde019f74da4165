use crate::output::{or_dash, print_json, print_table};
use toolbelt_core::tools;

pub fn which(programs: &[String], json: bool) -> anyhow::Result<()> {
    let found: Vec<(String, Option<String>)> = programs
        .iter()
        .map(|p| {
            let path = tools::resolve(p).map(|path| path.display().to_string());
            (p.clone(), path)
        })
        .collect();

    if json {
        let items: Vec<serde_json::Value> = found
            .iter()
            .map(|(program, path)| serde_json::json!({ "program": program, "path": path }))
            .collect();
        print_json(&items)?;
    } else if let [(_, Some(path))] = found.as_slice() {
        println!("{path}");
    } else {
        let rows = found
            .iter()
            .map(|(program, path)| vec![program.clone(), or_dash(path.as_deref())])
            .collect();
        print_table(&["PROGRAM", "PATH"], rows);
    }

    let missing: Vec<&str> = found
        .iter()
        .filter(|(_, path)| path.is_none())
        .map(|(program, _)| program.as_str())
        .collect();
    if !missing.is_empty() {
        anyhow::bail!("not found on PATH: {}", missing.join(", "));
    }
    Ok(())
}

pub fn list(json: bool) -> anyhow::Result<()> {
    let detected = tools::detect_all();
    if json {
        return print_json(&detected);
    }
    let rows = detected
        .iter()
        .map(|d| {
            vec![
                d.tool.binary().to_string(),
                or_dash(d.path.as_ref().map(|p| p.display())),
            ]
        })
        .collect();
    print_table(&["TOOL", "PATH"], rows);
    Ok(())
}
