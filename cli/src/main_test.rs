use super::*;

#[test]
fn parse_points_reads_pairs() {
    let points = parse_points("0,0 1.5,-2  10,10").unwrap();
    assert_eq!(points, vec![Point::new(0.0, 0.0), Point::new(1.5, -2.0), Point::new(10.0, 10.0)]);
}

#[test]
fn parse_points_rejects_bad_pairs() {
    assert!(matches!(parse_points("0,0 7"), Err(CliError::InvalidPoint(p)) if p == "7"));
    assert!(matches!(parse_points("x,1"), Err(CliError::InvalidPoint(_))));
    assert!(matches!(parse_points("inf,1"), Err(CliError::InvalidPoint(_))));
    assert!(parse_points("   ").unwrap().is_empty());
}

#[test]
fn ws_url_maps_scheme() {
    assert_eq!(ws_url("http://127.0.0.1:3000").unwrap(), "ws://127.0.0.1:3000/api/ws");
    assert_eq!(ws_url("https://sketch.example.com/").unwrap(), "wss://sketch.example.com/api/ws");
    assert!(matches!(ws_url("ftp://nope"), Err(CliError::InvalidBaseUrl(_))));
}

#[test]
fn draw_args_parse_with_defaults() {
    let session = Uuid::new_v4();
    let session_arg = session.to_string();
    let cli = Cli::try_parse_from(["sketch", "--name", "ada", "draw", "--session", &session_arg, "--points", "0,0 1,1"])
        .unwrap();
    assert_eq!(cli.name, "ada");
    let Command::Draw(args) = cli.command else {
        panic!("expected draw");
    };
    assert_eq!(args.session, session);
    assert!(matches!(args.tool, ToolArg::Pen));
    assert_eq!(args.color, "red");
    assert_eq!(args.width, 5);
}

#[test]
fn eraser_tool_maps_to_canvas_tool() {
    assert_eq!(Tool::from(ToolArg::Eraser), Tool::Eraser);
}
