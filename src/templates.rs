//! HTML templates and styling.
//!
//! Pages are plain server-rendered HTML. The editor and graph scripts talk to
//! the JSON API and the layout WebSocket; all graph and layout logic stays on
//! the server.

use crate::models::{Note, SearchResult};
use crate::notes::html_escape;

// ============================================================================
// CSS Styles
// ============================================================================

pub const STYLE: &str = r#"
/* Solarized Light Theme */
:root {
    --base01: #586e75;
    --base00: #657b83;
    --base1: #93a1a1;
    --base2: #eee8d5;
    --base3: #fdf6e3;
    --red: #dc322f;
    --blue: #268bd2;
    --cyan: #2aa198;

    --bg: var(--base3);
    --fg: var(--base00);
    --muted: var(--base1);
    --border: var(--base2);
    --link: var(--blue);
    --link-hover: var(--cyan);
    --accent: var(--base2);
}

* { box-sizing: border-box; margin: 0; padding: 0; }

body {
    font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, "Helvetica Neue", Arial, sans-serif;
    line-height: 1.6;
    color: var(--fg);
    background: var(--bg);
}

.container { max-width: 900px; margin: 0 auto; padding: 1rem; }

a { color: var(--link); text-decoration: none; }
a:hover { color: var(--link-hover); text-decoration: underline; }

h1, h2, h3 { font-weight: 600; margin-top: 1.5em; margin-bottom: 0.5em; }
h1 { font-size: 1.5rem; }

.nav-bar {
    position: sticky;
    top: 0;
    background: var(--bg);
    border-bottom: 1px solid var(--border);
    padding: 0.5rem 1rem;
    display: flex;
    gap: 1rem;
    align-items: center;
    z-index: 100;
}
.nav-bar .spacer { flex: 1; }
.nav-bar button {
    background: none;
    border: none;
    color: var(--link);
    cursor: pointer;
    font: inherit;
}

.search-box input {
    padding: 0.4rem 0.75rem;
    border: 1px solid var(--border);
    border-radius: 4px;
    background: var(--bg);
    color: var(--fg);
    width: 180px;
}

.note-list { list-style: none; }
.note-item {
    padding: 0.75rem 0;
    border-bottom: 1px solid var(--border);
    display: flex;
    justify-content: space-between;
    gap: 1rem;
}
.note-item .meta { font-size: 0.8rem; color: var(--muted); white-space: nowrap; }
.tag { font-size: 0.7rem; padding: 0.1rem 0.4rem; background: var(--accent); border-radius: 3px; margin-left: 0.3rem; }

.note-content p, .note-content ul, .note-content ol { margin: 0.6rem 0; }
.note-content ul, .note-content ol { padding-left: 1.5rem; }
.note-content pre { background: var(--accent); padding: 1rem; overflow-x: auto; border-radius: 4px; }
.wikilink { border-bottom: 1px dotted var(--link); }
.missing-link { color: var(--red); border-bottom: 1px dashed var(--red); cursor: help; }

.editor { display: flex; flex-direction: column; gap: 0.5rem; position: relative; margin-top: 1rem; }
.editor input, .editor textarea {
    width: 100%;
    padding: 0.5rem;
    border: 1px solid var(--border);
    border-radius: 4px;
    background: white;
    color: var(--base01);
    font: inherit;
}
.editor textarea { min-height: 320px; font-family: "SF Mono", "Consolas", monospace; font-size: 0.9rem; }
.ai-bar { display: flex; gap: 0.5rem; flex-wrap: wrap; }
.ai-bar button, .ai-bar label {
    padding: 0.3rem 0.7rem;
    border: 1px solid var(--border);
    border-radius: 4px;
    background: var(--accent);
    color: var(--fg);
    cursor: pointer;
    font-size: 0.85rem;
}
.status { font-size: 0.8rem; color: var(--muted); }

.suggestions {
    position: absolute;
    list-style: none;
    background: white;
    border: 1px solid var(--border);
    border-radius: 4px;
    box-shadow: 0 2px 6px rgba(0,0,0,0.1);
    z-index: 10;
    min-width: 200px;
}
.suggestions li { padding: 0.3rem 0.6rem; cursor: pointer; }
.suggestions li.active, .suggestions li:hover { background: var(--accent); }

.links-panel { margin-top: 2rem; font-size: 0.9rem; }
.links-panel h3 { font-size: 1rem; }

#graph { position: fixed; top: 48px; left: 0; right: 0; bottom: 0; }
#graph svg { width: 100%; height: 100%; cursor: grab; }
#graph line { stroke: var(--base1); stroke-opacity: 0.6; }
#graph circle { fill: var(--blue); stroke: white; stroke-width: 1.5; cursor: pointer; }
#graph circle.pinned { fill: var(--cyan); }
#graph g.dim { opacity: 0.2; }
#graph text { font-size: 11px; fill: var(--base01); pointer-events: none; }
"#;

// ============================================================================
// Page Shell
// ============================================================================

pub fn nav_bar(search_query: Option<&str>) -> String {
    format!(
        r#"<nav class="nav-bar">
            <a href="/">All</a>
            <a href="/graph">Graph</a>
            <button onclick="newNote()">New</button>
            <a href="/api/export">Export</a>
            <span class="spacer"></span>
            <form class="search-box" action="/" method="get">
                <input type="text" name="q" placeholder="Search..." value="{}">
            </form>
        </nav>"#,
        html_escape(search_query.unwrap_or(""))
    )
}

const NEW_NOTE_JS: &str = r#"
async function newNote() {
    const title = prompt('Title for the new note');
    if (title === null) return;
    const resp = await fetch('/api/notes', {
        method: 'POST',
        headers: {'Content-Type': 'application/json'},
        body: JSON.stringify({title: title, content: ''}),
    });
    if (resp.ok) {
        const note = await resp.json();
        location.href = '/note/' + note.id;
    } else {
        alert(await resp.text());
    }
}
"#;

pub fn base_html(title: &str, content: &str, search_query: Option<&str>) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{title}</title>
    <style>{STYLE}</style>
</head>
<body>
    {nav}
    <div class="container">
        {content}
    </div>
    <script>{NEW_NOTE_JS}</script>
</body>
</html>"#,
        title = html_escape(title),
        nav = nav_bar(search_query),
    )
}

// ============================================================================
// Note List
// ============================================================================

fn tag_badges(tags: &[String]) -> String {
    tags.iter()
        .map(|t| format!(r#"<span class="tag">{}</span>"#, html_escape(t)))
        .collect()
}

pub fn render_note_list(notes: &[Note]) -> String {
    let mut html = String::from("<ul class=\"note-list\">");
    for note in notes {
        let title = if note.title.trim().is_empty() {
            "(untitled)".to_string()
        } else {
            html_escape(&note.title)
        };
        html.push_str(&format!(
            r#"<li class="note-item">
                <span><a href="/note/{id}">{title}</a>{tags}</span>
                <span class="meta">{updated}</span>
            </li>"#,
            id = note.id,
            title = title,
            tags = tag_badges(&note.tags),
            updated = note.updated_at.format("%Y-%m-%d %H:%M"),
        ));
    }
    html.push_str("</ul>");
    html
}

pub fn render_search_results(query: &str, results: &[SearchResult]) -> String {
    let mut html = format!(
        "<h1>Search: \"{}\"</h1><p>{} results</p><ul class=\"note-list\">",
        html_escape(query),
        results.len()
    );
    for result in results {
        html.push_str(&format!(
            r#"<li class="note-item"><span><a href="/note/{}">{}</a><br><span class="meta">{}</span></span></li>"#,
            result.note_id,
            html_escape(&result.title),
            result
                .matches
                .iter()
                .take(3)
                .map(|m| html_escape(&m.line_content))
                .collect::<Vec<_>>()
                .join(" &middot; "),
        ));
    }
    html.push_str("</ul>");
    html
}

// ============================================================================
// Note Page
// ============================================================================

const EDITOR_JS: &str = r#"
const noteId = document.getElementById('note').dataset.id;
const body = document.getElementById('body');
const titleInput = document.getElementById('title');
const status = document.getElementById('status');
const popup = document.getElementById('suggestions');
let suggestions = [];
let selected = 0;

function byteOffset(text, charIndex) {
    return new TextEncoder().encode(text.slice(0, charIndex)).length;
}

function charIndex(text, byteOffset) {
    const bytes = new TextEncoder().encode(text).slice(0, byteOffset);
    return new TextDecoder().decode(bytes).length;
}

async function send(method, url, payload) {
    const resp = await fetch(url, {
        method: method,
        headers: {'Content-Type': 'application/json'},
        body: JSON.stringify(payload),
    });
    if (!resp.ok) {
        status.textContent = await resp.text();
        return null;
    }
    return resp.json();
}

async function patch(fields) {
    status.textContent = 'Editing...';
    const note = await send('PATCH', '/api/notes/' + noteId, fields);
    if (note) status.textContent = 'Saved shortly';
}

async function refreshSuggestions() {
    const cursor = byteOffset(body.value, body.selectionStart);
    const res = await send('POST', '/api/autocomplete', {note_id: noteId, body: body.value, cursor: cursor});
    if (!res || !res.open || res.suggestions.length === 0) {
        popup.hidden = true;
        suggestions = [];
        return;
    }
    suggestions = res.suggestions;
    selected = 0;
    popup.innerHTML = '';
    suggestions.forEach((s, i) => {
        const li = document.createElement('li');
        li.textContent = s.title;
        if (i === selected) li.className = 'active';
        li.onmousedown = (e) => { e.preventDefault(); accept(s.title); };
        popup.appendChild(li);
    });
    popup.hidden = false;
}

async function accept(title) {
    const cursor = byteOffset(body.value, body.selectionStart);
    const res = await send('POST', '/api/autocomplete/apply', {note_id: noteId, body: body.value, cursor: cursor, title: title});
    popup.hidden = true;
    suggestions = [];
    if (!res) return;
    body.value = res.body;
    const pos = charIndex(res.body, res.cursor);
    body.setSelectionRange(pos, pos);
    body.focus();
}

body.addEventListener('input', () => { patch({content: body.value}); refreshSuggestions(); });
body.addEventListener('click', refreshSuggestions);
body.addEventListener('keydown', (e) => {
    if (popup.hidden || suggestions.length === 0) return;
    if (e.key === 'ArrowDown' || e.key === 'ArrowUp') {
        e.preventDefault();
        selected = (selected + (e.key === 'ArrowDown' ? 1 : suggestions.length - 1)) % suggestions.length;
        [...popup.children].forEach((li, i) => li.className = i === selected ? 'active' : '');
    } else if (e.key === 'Enter' || e.key === 'Tab') {
        e.preventDefault();
        accept(suggestions[selected].title);
    } else if (e.key === 'Escape') {
        popup.hidden = true;
    }
});
titleInput.addEventListener('input', () => patch({title: titleInput.value}));

async function runAi(kind, payload) {
    status.textContent = 'Asking AI...';
    const res = await send('POST', '/api/ai/' + kind, payload || {});
    if (!res) return;
    if (res.status === 'applied') {
        body.value = res.note.content;
        status.textContent = 'AI result added';
    } else {
        status.textContent = 'AI result discarded (' + res.status + ')';
    }
}

function readFile(input, kind) {
    const file = input.files[0];
    if (!file) return;
    const reader = new FileReader();
    reader.onload = () => {
        const data = reader.result.split(',')[1];
        runAi(kind, {data: data, mime_type: file.type});
    };
    reader.readAsDataURL(file);
}

async function deleteNote() {
    if (!confirm('Delete this note?')) return;
    const resp = await fetch('/api/notes/' + noteId, {method: 'DELETE'});
    if (resp.ok) location.href = '/graph';
}
"#;

/// The note page: rendered body, the editor and the link report.
pub fn render_note_page(
    note: &Note,
    rendered_body: &str,
    backlinks: &[(String, String)],
    unresolved: &[String],
) -> String {
    let backlinks_html = if backlinks.is_empty() {
        "<p class=\"status\">No notes link here yet.</p>".to_string()
    } else {
        let items: String = backlinks
            .iter()
            .map(|(id, title)| format!(r#"<li><a href="/note/{}">{}</a></li>"#, id, html_escape(title)))
            .collect();
        format!("<ul>{}</ul>", items)
    };
    let unresolved_html = if unresolved.is_empty() {
        String::new()
    } else {
        let items: String = unresolved
            .iter()
            .map(|t| format!("<li class=\"missing-link\">{}</li>", html_escape(t)))
            .collect();
        format!("<h3>Unresolved links</h3><ul>{}</ul>", items)
    };

    format!(
        r#"<div id="note" data-id="{id}">
    <div class="note-content">{rendered}</div>
    <div class="editor">
        <input id="title" value="{title}" placeholder="Title">
        <textarea id="body" spellcheck="true">{content}</textarea>
        <ul id="suggestions" class="suggestions" hidden></ul>
        <div class="ai-bar">
            <button onclick="runAi('research', {{query: prompt('Research topic') || ''}})">Research</button>
            <button onclick="runAi('enhance', {{instruction: prompt('How should the note be improved?') || 'Improve clarity'}})">Enhance</button>
            <button onclick="runAi('auto-connect')">Auto-connect</button>
            <label>Image <input type="file" accept="image/*" hidden onchange="readFile(this, 'image')"></label>
            <label>Audio <input type="file" accept="audio/*" hidden onchange="readFile(this, 'audio')"></label>
            <button onclick="deleteNote()">Delete</button>
        </div>
        <span id="status" class="status"></span>
    </div>
    <div class="links-panel">
        <h3>Linked from</h3>
        {backlinks}
        {unresolved}
    </div>
</div>
<script>{EDITOR_JS}</script>"#,
        id = note.id,
        rendered = rendered_body,
        title = html_escape(&note.title),
        content = html_escape(&note.content),
        backlinks = backlinks_html,
        unresolved = unresolved_html,
    )
}

// ============================================================================
// Graph Page
// ============================================================================

const GRAPH_JS: &str = r#"
const svg = document.querySelector('#graph svg');
const edgeLayer = svg.querySelector('.edges');
const nodeLayer = svg.querySelector('.nodes');
const titles = JSON.parse(document.getElementById('graph-titles').textContent);
const matches = JSON.parse(document.getElementById('graph-matches').textContent);
const matching = matches ? new Set(matches) : null;
let viewport = {scale: 1, tx: 0, ty: 0};
let dragging = null;
let panning = null;
let moved = false;

async function post(url, payload) {
    const resp = await fetch(url, {
        method: 'POST',
        headers: {'Content-Type': 'application/json'},
        body: JSON.stringify(payload),
    });
    return resp.ok ? resp.json() : null;
}

function setViewport(v) {
    if (!v) return;
    viewport = v;
    svg.querySelector('.world').setAttribute('transform',
        `translate(${v.tx},${v.ty}) scale(${v.scale})`);
}

function draw(snapshot) {
    const pos = new Map(snapshot.nodes.map(n => [n.id, n]));
    edgeLayer.innerHTML = snapshot.edges.map(([s, t]) => {
        const a = pos.get(s), b = pos.get(t);
        return a && b ? `<line x1="${a.x}" y1="${a.y}" x2="${b.x}" y2="${b.y}"></line>` : '';
    }).join('');
    nodeLayer.innerHTML = '';
    for (const n of snapshot.nodes) {
        const g = document.createElementNS('http://www.w3.org/2000/svg', 'g');
        if (matching && !matching.has(n.id)) g.setAttribute('class', 'dim');
        const c = document.createElementNS('http://www.w3.org/2000/svg', 'circle');
        c.setAttribute('cx', n.x);
        c.setAttribute('cy', n.y);
        c.setAttribute('r', 8);
        c.dataset.id = n.id;
        if (n.pinned) c.setAttribute('class', 'pinned');
        const t = document.createElementNS('http://www.w3.org/2000/svg', 'text');
        t.setAttribute('x', n.x + 11);
        t.setAttribute('y', n.y + 4);
        t.textContent = titles[n.id] || '';
        g.appendChild(c);
        g.appendChild(t);
        nodeLayer.appendChild(g);
    }
}

function local(e) {
    const r = svg.getBoundingClientRect();
    return {sx: e.clientX - r.left, sy: e.clientY - r.top};
}

svg.addEventListener('pointerdown', (e) => {
    const p = local(e);
    moved = false;
    if (e.target.tagName === 'circle') {
        dragging = e.target.dataset.id;
        post('/api/layout/drag', {id: dragging, phase: 'start', sx: p.sx, sy: p.sy});
    } else {
        panning = p;
    }
});
svg.addEventListener('pointermove', (e) => {
    const p = local(e);
    if (dragging) {
        moved = true;
        post('/api/layout/drag', {id: dragging, phase: 'move', sx: p.sx, sy: p.sy});
    } else if (panning) {
        moved = true;
        post('/api/layout/viewport', {action: 'pan', dx: p.sx - panning.sx, dy: p.sy - panning.sy}).then(setViewport);
        panning = p;
    }
});
svg.addEventListener('pointerup', async (e) => {
    const p = local(e);
    if (dragging) {
        await post('/api/layout/drag', {id: dragging, phase: 'end', sx: p.sx, sy: p.sy});
    }
    if (!moved) {
        const res = await post('/api/layout/click', {sx: p.sx, sy: p.sy});
        if (res && res.id) location.href = '/note/' + res.id;
    }
    dragging = null;
    panning = null;
});
svg.addEventListener('wheel', (e) => {
    e.preventDefault();
    const p = local(e);
    const factor = e.deltaY < 0 ? 1.1 : 1 / 1.1;
    post('/api/layout/viewport', {action: 'zoom', sx: p.sx, sy: p.sy, factor: factor}).then(setViewport);
}, {passive: false});

const r = svg.getBoundingClientRect();
post('/api/layout/viewport', {action: 'center', width: r.width, height: r.height}).then(setViewport);

const proto = location.protocol === 'https:' ? 'wss:' : 'ws:';
const ws = new WebSocket(proto + '//' + location.host + '/ws/layout');
ws.onmessage = (msg) => draw(JSON.parse(msg.data));
"#;

/// The graph view. `titles_json` maps node id to title for labels;
/// `matches_json` lists the ids a query kept (`null` shows every node at
/// full strength).
pub fn render_graph_page(titles_json: &str, matches_json: &str, query: &str, summary: &str) -> String {
    format!(
        r#"<form class="graph-query" method="get" action="/graph">
    <input type="text" name="q" value="{query}" placeholder="tag:rust hubs from:Title depth:2">
</form>
<p class="status">{summary}</p>
<div id="graph">
    <svg><g class="world"><g class="edges"></g><g class="nodes"></g></g></svg>
</div>
<script type="application/json" id="graph-titles">{titles}</script>
<script type="application/json" id="graph-matches">{matches}</script>
<script>{GRAPH_JS}</script>"#,
        query = html_escape(query),
        summary = html_escape(summary),
        titles = titles_json.replace("</", "<\\/"),
        matches = matches_json.replace("</", "<\\/"),
    )
}
