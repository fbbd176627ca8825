use jsonschema::validator_for;
use serde::Serialize;
use serde_json::{json, Map, Value};

const PRIORITY_VALUES: [i64; 4] = [0, 1, 3, 5];

#[derive(Debug, Clone, PartialEq, Serialize)]
/// Agent-facing tool and the remote MCP tool it forwards to.
pub struct BridgeToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
    pub remote_tool: &'static str,
}

pub fn bridge_tool_catalog() -> Vec<BridgeToolDefinition> {
    vec![
        BridgeToolDefinition {
            name: "dida_get_tasks",
            description: "List tasks from the Dida to-do list",
            parameters: object_schema(
                json!({
                    "mode": {
                        "type": "string",
                        "description": "Task mode: all/today/yesterday/recent_7_days",
                        "enum": ["all", "today", "yesterday", "recent_7_days"]
                    },
                    "keyword": {"type": "string", "description": "Keyword filter"},
                    "priority": priority_schema("Priority: 0/1/3/5"),
                    "project_name": {"type": "string", "description": "Project name filter"},
                    "completed": {"type": "boolean", "description": "Whether the task is completed"}
                }),
                &[],
            ),
            remote_tool: "get_tasks",
        },
        BridgeToolDefinition {
            name: "dida_create_task",
            description: "Create a task in the Dida to-do list",
            parameters: object_schema(
                json!({
                    "title": {"type": "string", "description": "Task title"},
                    "content": {"type": "string", "description": "Task content"},
                    "priority": priority_schema("Priority: 0/1/3/5"),
                    "project_name": {"type": "string", "description": "Project name"},
                    "tag_names": string_list_schema("Tag names"),
                    "start_date": {"type": "string", "description": "Start time, YYYY-MM-DD HH:MM:SS"},
                    "due_date": {"type": "string", "description": "Due time, YYYY-MM-DD HH:MM:SS"},
                    "is_all_day": {"type": "boolean", "description": "All-day task"},
                    "reminder": {"type": "string", "description": "Reminder option such as -5M or -1H"},
                    "project_id": {"type": "string", "description": "Project id"},
                    "desc": {"type": "string", "description": "Raw desc field"},
                    "time_zone": {"type": "string", "description": "Time zone"},
                    "reminders": string_list_schema("Reminder list"),
                    "repeat_flag": {"type": "string", "description": "Repeat rule"},
                    "sort_order": {"type": "integer", "description": "Sort order"},
                    "items": {
                        "type": "array",
                        "items": {"type": "object", "additionalProperties": true},
                        "description": "Subtasks"
                    }
                }),
                &["title"],
            ),
            remote_tool: "create_task",
        },
        BridgeToolDefinition {
            name: "dida_update_task",
            description: "Update a task in the Dida to-do list",
            parameters: object_schema(
                json!({
                    "task_id_or_title": {"type": "string", "description": "Task id or title"},
                    "title": {"type": "string", "description": "New title"},
                    "content": {"type": "string", "description": "New content"},
                    "priority": priority_schema("New priority: 0/1/3/5"),
                    "project_name": {"type": "string", "description": "New project name"},
                    "tag_names": string_list_schema("New tag names"),
                    "start_date": {"type": "string", "description": "New start time"},
                    "due_date": {"type": "string", "description": "New due time"},
                    "is_all_day": {"type": "boolean", "description": "All-day task"},
                    "reminder": {"type": "string", "description": "New reminder"},
                    "status": {"type": "integer", "description": "Status: 0 open / 2 completed"}
                }),
                &["task_id_or_title"],
            ),
            remote_tool: "update_task",
        },
        single_target_tool(
            "dida_complete_task",
            "Complete a task in the Dida to-do list",
            "task_id_or_title",
            "Task id or title",
            "complete_task",
        ),
        single_target_tool(
            "dida_delete_task",
            "Delete a task from the Dida to-do list",
            "task_id_or_title",
            "Task id or title",
            "delete_task",
        ),
        BridgeToolDefinition {
            name: "dida_get_projects",
            description: "List projects from the Dida to-do list",
            parameters: object_schema(json!({}), &[]),
            remote_tool: "get_projects",
        },
        BridgeToolDefinition {
            name: "dida_create_project",
            description: "Create a project in the Dida to-do list",
            parameters: object_schema(
                json!({
                    "name": {"type": "string", "description": "Project name"},
                    "color": {"type": "string", "description": "Project color such as #FF0000"},
                    "view_mode": {"type": "string", "description": "View mode"},
                    "kind": {"type": "string", "description": "Project kind"},
                    "sort_order": {"type": "integer", "description": "Sort order"}
                }),
                &["name"],
            ),
            remote_tool: "create_project",
        },
        BridgeToolDefinition {
            name: "dida_update_project",
            description: "Update a project in the Dida to-do list",
            parameters: object_schema(
                json!({
                    "project_id_or_name": {"type": "string", "description": "Project id or name"},
                    "name": {"type": "string", "description": "New project name"},
                    "color": {"type": "string", "description": "New project color"},
                    "view_mode": {"type": "string", "description": "View mode"},
                    "kind": {"type": "string", "description": "Project kind"},
                    "sort_order": {"type": "integer", "description": "Sort order"}
                }),
                &["project_id_or_name"],
            ),
            remote_tool: "update_project",
        },
        single_target_tool(
            "dida_delete_project",
            "Delete a project from the Dida to-do list",
            "project_id_or_name",
            "Project id or name",
            "delete_project",
        ),
    ]
}

pub fn find_bridge_tool(name: &str) -> Option<BridgeToolDefinition> {
    let name = name.trim();
    bridge_tool_catalog()
        .into_iter()
        .find(|tool| tool.name == name)
}

/// Missing or `null` arguments become an empty object.
pub fn normalize_bridge_arguments(arguments: Option<Value>) -> Value {
    match arguments {
        None | Some(Value::Null) => Value::Object(Map::new()),
        Some(value) => value,
    }
}

pub fn validate_bridge_arguments(
    tool: &BridgeToolDefinition,
    arguments: &Value,
) -> Result<(), String> {
    let validator = validator_for(&tool.parameters)
        .map_err(|error| format!("invalid JSON schema for '{}': {error}", tool.name))?;

    let mut errors = validator.iter_errors(arguments);
    if let Some(first) = errors.next() {
        return Err(format!("invalid arguments for '{}': {}", tool.name, first));
    }

    Ok(())
}

fn object_schema(properties: Value, required: &[&str]) -> Value {
    let mut schema = json!({
        "type": "object",
        "additionalProperties": false,
        "properties": properties,
    });
    if !required.is_empty() {
        schema["required"] = json!(required);
    }
    schema
}

fn priority_schema(description: &str) -> Value {
    json!({"type": "integer", "description": description, "enum": PRIORITY_VALUES})
}

fn string_list_schema(description: &str) -> Value {
    json!({"type": "array", "items": {"type": "string"}, "description": description})
}

fn single_target_tool(
    name: &'static str,
    description: &'static str,
    field: &str,
    field_description: &str,
    remote_tool: &'static str,
) -> BridgeToolDefinition {
    let mut properties = Map::new();
    properties.insert(
        field.to_string(),
        json!({"type": "string", "description": field_description}),
    );
    BridgeToolDefinition {
        name,
        description,
        parameters: object_schema(Value::Object(properties), &[field]),
        remote_tool,
    }
}
