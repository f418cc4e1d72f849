/// Text payloads sent to the model. Nothing here is interpreted by the core
/// apart from `PLAN_MODE_MARKER`, which `/plan-mode` looks for in the reply.
use std::collections::BTreeMap;
use std::path::Path;

pub const PLAN_MODE_MARKER: &str = "PLAN_MODE_ENABLED";

// ── Session seed ──────────────────────────────────────────────────────────────

/// First message of every project conversation.
pub fn system_prompt(project: &str, project_dir: &Path) -> String {
    format!(
        r#"You are managing the project '{project}' in directory '{dir}'.
You can create, edit, move and delete files.
You can also execute terminal commands in the project directory using the 'terminal' action type.
When asked to perform terminal operations, respond with the appropriate terminal action.

IMPORTANT: Always use the 'edit' action_type when modifying existing files, never 'create' for files that already exist.
All paths are relative to the project directory.

Always respond with a JSON array of actions when asked to modify the project.
Example action format:
[
    {{
        "action_type": "create",
        "path": "src/main.py",
        "content": "print('Hello World')",
        "description": "Create main.py file with hello world code"
    }},
    {{
        "action_type": "edit",
        "path": "src/main.py",
        "content": "def hello():\n    print('Hello World')",
        "description": "Modify main.py to use a function"
    }},
    {{
        "action_type": "move",
        "path": "src/old.py",
        "content": "src/new.py",
        "description": "Rename old.py to new.py"
    }},
    {{
        "action_type": "remove",
        "path": "src/unused.py",
        "description": "Delete an unused module"
    }},
    {{
        "action_type": "terminal",
        "content": "npm install express",
        "description": "Install Express.js dependency"
    }}
]"#,
        dir = project_dir.display(),
    )
}

// ── Modes ─────────────────────────────────────────────────────────────────────

pub const WEB_MODE_PROMPT: &str = r#"From now on, when creating web projects or features, you should:

1. Be proactive with features:
   - When a request is not specific, expand it with the features a modern product would have
   - Think about the full user journey and add the supporting pages and flows it needs
   - Include admin or management views when appropriate

2. Use modern UI tooling:
   - Utility-first styling (Tailwind CSS) and a component library where it fits
   - An icon set, modern fonts, smooth animations and transitions
   - Loading skeletons, toast notifications and modal dialogs

3. Build complete layouts:
   - Mobile-first, fully responsive grids and navigation
   - Dark/light theme following the system preference
   - Accessible markup, keyboard navigation and screen reader support

4. Include security and performance basics:
   - Form validation with clear error messages
   - Lazy loading and image optimization
   - Sensible caching and SEO metadata

Respond with a confirmation if you understand these requirements."#;

const PLAN_RULES: &str = r#"1. Each iteration must have maximum 4 steps
2. Each step should be clear and achievable
3. Steps should be in logical order
4. Each iteration should have a clear goal
5. Consider dependencies between steps
6. Include testing and validation when needed
7. IMPORTANT: All files and directories must be created in the root directory '.'
   - DO NOT create a new project directory inside the project
   - Use relative paths starting with './' or just the filename
   - Example: './src/App.js' or 'package.json', not 'my-app/src/App.js'
   - All commands should run in the current directory
   - For npm/yarn init, use the current directory"#;

pub fn plan_mode_prompt() -> String {
    format!(
        r#"From now on, automatically create and follow iteration plans for all project requests.
Each request will be broken down into iterations following these rules:

{PLAN_RULES}

For every request:
1. Create a plan in the specified format
2. Execute each iteration step by step
3. Validate each step before moving to the next
4. Keep all files in the root project directory

Respond with '{PLAN_MODE_MARKER}' if you understand."#
    )
}

// ── Plans ─────────────────────────────────────────────────────────────────────

pub fn planning_prompt(query: Option<&str>) -> String {
    let goal = match query {
        Some(q) => format!("Project requirements: {q}"),
        None => "Analyze the current project state and create a plan for completion.".to_string(),
    };
    format!(
        r#"Create an iteration plan for the project.
{goal}

Rules for the plan:
{PLAN_RULES}

Format your response as:
```plan
Iteration 1: [Goal Description]
1. [Step 1]
2. [Step 2]
3. [Step 3]
4. [Step 4]

Iteration 2: [Goal Description]
1. [Step 1]
...
```

Then explain why you chose this order and any important considerations.

Remember: All files and commands must work in the current directory '.' - DO NOT create a new project directory!"#
    )
}

pub fn step_prompt(iteration: usize, step_no: usize, step: &str) -> String {
    format!(
        r#"Current Iteration: {iteration}
Current Step: {step_no} - {step}

Based on this step, please:
1. Analyze what needs to be done
2. Generate necessary actions (file creation, modifications, terminal commands)
3. Ensure all changes are properly tested
4. Consider dependencies from previous steps

Respond with specific actions to implement this step."#
    )
}

// ── Analysis ──────────────────────────────────────────────────────────────────

/// `exit` is `None` when the command was interrupted.
pub fn command_analysis_prompt(command: &str, exit: Option<i32>) -> String {
    let exit = exit.map_or_else(|| "interrupted".to_string(), |c| c.to_string());
    format!(
        r#"Command: {command}
Exit code: {exit}

Please provide a brief analysis:
1. Success/failure status
2. Suggested next steps"#
    )
}

pub const IMAGE_ANALYSIS_PROMPT: &str = r#"Please analyze this image and describe its visual aspects in detail:
1. Overall layout and composition
2. Color scheme and visual style
3. UI elements and their arrangement (if applicable)
4. Typography and text styling
5. Visual patterns and design elements
6. Spacing and proportions
7. Any notable animations or interactive elements suggested by the design

Focus on the visual design aspects that could be referenced in development.
Be detailed but organized in your analysis."#;

pub fn implementation_prompt(description: &str, request: &str) -> String {
    format!(
        r#"Visual Reference:
{description}

Implementation Request: {request}

Based on the visual reference above and the implementation request, please:
1. Follow the visual style from the reference
2. Include all necessary files and code
3. Add appropriate animations and interactions
4. Ensure responsive design

Respond with actions to create the implementation."#
    )
}

/// `files` is the full structure; `contents` holds the readable text files.
pub fn codebase_prompt(files: &[String], contents: &[(String, String)], query: Option<&str>) -> String {
    let listing = files
        .iter()
        .map(|f| format!("- {f}"))
        .collect::<Vec<_>>()
        .join("\n");
    let blocks: String = contents
        .iter()
        .map(|(path, content)| file_block(path, content))
        .collect();
    let ask = match query {
        Some(q) => format!(
            "User query: {q}\n\nAnalyze the project based on the query, considering both structure and file contents."
        ),
        None => "Please analyze the project structure and provide an overview of the codebase.".to_string(),
    };
    format!("Project structure and contents:\n\nFiles:\n{listing}\n\nContents:\n{blocks}\n\n{ask}\n")
}

// ── Turn composition ──────────────────────────────────────────────────────────

pub fn file_block(path: &str, content: &str) -> String {
    format!("\nFile: {path}\n```\n{content}\n```\n")
}

/// Prefix `utterance` with every pinned file; unchanged when nothing is pinned.
pub fn compose_request(files: &BTreeMap<String, String>, utterance: &str) -> String {
    if files.is_empty() {
        return utterance.to_string();
    }
    let blocks: String = files.iter().map(|(p, c)| file_block(p, c)).collect();
    format!("Active files in context:\n{blocks}\n\nUser request: {utterance}")
}
