//! Scriptable MCP server speaking newline-delimited JSON-RPC on stdio.
//!
//! The end-to-end tests in `tests/` run it as a real child process. The
//! crate is not published.
//!
//! Flags:
//!   --fail-tools-list      answer `tools/list` with an error
//!   --no-reply METHOD      never answer METHOD (repeatable)
//!   --garbage              write a non-JSON line before every reply
//!   --exit-on-call CODE    exit with CODE when a tool is called
//!   --delay-init-ms MS     wait before answering `initialize`
//!   --pid-file PATH        write the process id to PATH at startup
//!
//! Tools: `echo` returns its `text` argument (an error without one);
//! `add_tool` registers an extra tool and sends
//! `notifications/tools/list_changed` before replying.

use serde_json::{json, Value};
use std::io::{self, BufRead, Write};
use std::time::Duration;

#[derive(Default)]
struct Script {
    fail_tools_list: bool,
    no_reply: Vec<String>,
    garbage: bool,
    exit_on_call: Option<i32>,
    delay_init: Option<Duration>,
    pid_file: Option<String>,
}

impl Script {
    fn from_args() -> Self {
        let mut script = Script::default();
        let mut args = std::env::args().skip(1);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--fail-tools-list" => script.fail_tools_list = true,
                "--garbage" => script.garbage = true,
                "--no-reply" => script.no_reply.extend(args.next()),
                "--exit-on-call" => script.exit_on_call = args.next().and_then(|c| c.parse().ok()),
                "--delay-init-ms" => {
                    script.delay_init = args
                        .next()
                        .and_then(|ms| ms.parse().ok())
                        .map(Duration::from_millis)
                }
                "--pid-file" => script.pid_file = args.next(),
                other => eprintln!("mock server: ignoring unknown flag {}", other),
            }
        }
        script
    }
}

struct Server {
    script: Script,
    tools: Vec<Value>,
    out: io::Stdout,
}

impl Server {
    fn write(&mut self, message: &Value) -> io::Result<()> {
        let mut out = self.out.lock();
        if self.script.garbage {
            writeln!(out, "mock server debug output {{ not json")?;
        }
        writeln!(out, "{}", message)?;
        out.flush()
    }

    fn handle(&mut self, message: Value) -> io::Result<()> {
        let Some(method) = message.get("method").and_then(Value::as_str).map(str::to_string) else {
            // a reply to something we never asked
            return Ok(());
        };
        let Some(id) = message.get("id").cloned() else {
            return Ok(());
        };
        if self.script.no_reply.contains(&method) {
            return Ok(());
        }

        let params = message.get("params").cloned().unwrap_or(Value::Null);
        let outcome = self.answer(&method, &params)?;
        let reply = match outcome {
            Ok(result) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
            Err(error) => json!({ "jsonrpc": "2.0", "id": id, "error": error }),
        };
        self.write(&reply)
    }

    fn answer(&mut self, method: &str, params: &Value) -> io::Result<Result<Value, Value>> {
        let result = match method {
            "initialize" => {
                if let Some(delay) = self.script.delay_init {
                    std::thread::sleep(delay);
                }
                json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": { "tools": { "listChanged": true }, "resources": {}, "prompts": {} },
                    "serverInfo": { "name": "tern-mock-server", "version": env!("CARGO_PKG_VERSION") }
                })
            }
            "tools/list" if self.script.fail_tools_list => {
                return Ok(Err(json!({ "code": -32603, "message": "tools/list is broken" })));
            }
            "tools/list" => json!({ "tools": self.tools }),
            "resources/list" => json!({
                "resources": [{ "uri": "mock://readme", "name": "readme", "mimeType": "text/plain" }]
            }),
            "prompts/list" => json!({
                "prompts": [{ "name": "greet", "arguments": [{ "name": "who", "required": true }] }]
            }),
            "resources/read" => json!({
                "contents": [{ "uri": params["uri"], "mimeType": "text/plain", "text": "hello from mock" }]
            }),
            "prompts/get" => {
                let who = params["arguments"]["who"].as_str().unwrap_or("world");
                json!({
                    "messages": [{ "role": "user", "content": { "type": "text", "text": format!("Hello, {}!", who) } }]
                })
            }
            "tools/call" => {
                if let Some(code) = self.script.exit_on_call {
                    std::process::exit(code);
                }
                return self.call_tool(params);
            }
            "ping" => json!({}),
            other => {
                return Ok(Err(json!({ "code": -32601, "message": format!("Method not found: {}", other) })));
            }
        };
        Ok(Ok(result))
    }

    fn call_tool(&mut self, params: &Value) -> io::Result<Result<Value, Value>> {
        let arguments = &params["arguments"];
        match params["name"].as_str() {
            Some("echo") => match arguments["text"].as_str() {
                Some(text) => Ok(Ok(json!({ "content": [{ "type": "text", "text": text }] }))),
                None => Ok(Err(json!({ "code": -32602, "message": "echo: missing text argument" }))),
            },
            Some("add_tool") => {
                let name = arguments["name"].as_str().unwrap_or("extra").to_string();
                self.tools.push(json!({ "name": name, "inputSchema": { "type": "object" } }));
                self.write(&json!({ "jsonrpc": "2.0", "method": "notifications/tools/list_changed" }))?;
                Ok(Ok(json!({ "content": [{ "type": "text", "text": format!("added {}", name) }] })))
            }
            other => Ok(Err(json!({
                "code": -32602,
                "message": format!("Unknown tool: {}", other.unwrap_or("<none>"))
            }))),
        }
    }
}

fn main() -> io::Result<()> {
    let script = Script::from_args();
    if let Some(path) = &script.pid_file {
        std::fs::write(path, std::process::id().to_string())?;
    }
    eprintln!("mock server ready");

    let mut server = Server {
        script,
        tools: vec![json!({
            "name": "echo",
            "description": "Echo back the text argument",
            "inputSchema": {
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            }
        }), json!({
            "name": "add_tool",
            "description": "Register another tool and announce the change",
            "inputSchema": { "type": "object", "properties": { "name": { "type": "string" } } }
        })],
        out: io::stdout(),
    };

    for line in io::stdin().lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(&line) {
            Ok(message) => server.handle(message)?,
            Err(e) => eprintln!("mock server: bad input: {}", e),
        }
    }
    Ok(())
}
