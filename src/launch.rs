use std::path::PathBuf;

pub const USAGE: &str = "Usage: openscans [--open] <file-or-folder>...";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchRequest {
    /// Files and/or folders to load at startup.
    OpenPaths(Vec<PathBuf>),
    ShowHelp,
    ShowVersion,
}

pub fn parse_launch_request_from_args(args: &[String]) -> Result<Option<LaunchRequest>, String> {
    if args.is_empty() {
        return Ok(None);
    }

    match args[0].as_str() {
        "-h" | "--help" => return Ok(Some(LaunchRequest::ShowHelp)),
        "-V" | "--version" => return Ok(Some(LaunchRequest::ShowVersion)),
        _ => {}
    }

    let paths = if args[0] == "--open" {
        if args.len() == 1 {
            return Err("Missing file path(s) after --open.".to_string());
        }
        &args[1..]
    } else {
        args
    };

    if let Some(flag) = paths
        .iter()
        .find(|arg| arg.starts_with("--") && arg.as_str() != "--")
    {
        return Err(format!("Unknown option {flag}. {USAGE}"));
    }

    let paths = paths
        .iter()
        .filter(|arg| arg.as_str() != "--")
        .map(PathBuf::from)
        .collect::<Vec<_>>();
    if paths.is_empty() {
        return Ok(None);
    }
    Ok(Some(LaunchRequest::OpenPaths(paths)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn no_args_means_no_request() {
        assert_eq!(parse_launch_request_from_args(&[]), Ok(None));
    }

    #[test]
    fn parse_open_flag() {
        let request = parse_launch_request_from_args(&args(&["--open", "/scans/a", "b.dcm"]))
            .expect("parse args");
        assert_eq!(
            request,
            Some(LaunchRequest::OpenPaths(vec![
                PathBuf::from("/scans/a"),
                PathBuf::from("b.dcm")
            ]))
        );
    }

    #[test]
    fn open_flag_requires_paths() {
        let err = parse_launch_request_from_args(&args(&["--open"])).expect_err("missing paths");
        assert!(err.contains("Missing file path"));
    }

    #[test]
    fn parse_cli_falls_back_to_raw_paths() {
        let request =
            parse_launch_request_from_args(&args(&["/tmp/a.dcm", "/tmp/b.dcm"])).expect("parse");
        assert_eq!(
            request,
            Some(LaunchRequest::OpenPaths(vec![
                PathBuf::from("/tmp/a.dcm"),
                PathBuf::from("/tmp/b.dcm")
            ]))
        );
    }

    #[test]
    fn double_dash_ends_options() {
        let request = parse_launch_request_from_args(&args(&["--", "-scan-"])).expect("parse");
        assert_eq!(
            request,
            Some(LaunchRequest::OpenPaths(vec![PathBuf::from("-scan-")]))
        );
    }

    #[test]
    fn help_version_and_unknown_flags() {
        assert_eq!(
            parse_launch_request_from_args(&args(&["--help"])),
            Ok(Some(LaunchRequest::ShowHelp))
        );
        assert_eq!(
            parse_launch_request_from_args(&args(&["-V"])),
            Ok(Some(LaunchRequest::ShowVersion))
        );
        let err = parse_launch_request_from_args(&args(&["--pacs", "x"])).expect_err("unknown");
        assert!(err.contains("Unknown option --pacs"));
    }
}
