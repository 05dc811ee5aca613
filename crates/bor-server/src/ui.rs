//! The embedded HTML UI.
//!
//! A single fixed page served at `/`. It reads the JSON API the same way
//! any other client does; the daemon treats it as an opaque blob.

pub const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>boxofrocks</title>
<style>
  body { font-family: ui-monospace, monospace; margin: 2rem auto; max-width: 56rem; color: #222; }
  h1 { font-size: 1.3rem; }
  table { border-collapse: collapse; width: 100%; margin-top: 1rem; }
  th, td { text-align: left; padding: 0.3rem 0.6rem; border-bottom: 1px solid #ddd; }
  .muted { color: #888; }
  .pill { border-radius: 6px; padding: 0 0.4rem; background: #eee; }
</style>
</head>
<body>
<h1>boxofrocks</h1>
<p class="muted" id="summary">loading…</p>
<table id="issues"><thead>
<tr><th>#</th><th>title</th><th>status</th><th>prio</th><th>owner</th></tr>
</thead><tbody></tbody></table>
<script>
async function refresh() {
  const health = await (await fetch('/health')).json();
  document.getElementById('summary').textContent =
    'repos: ' + (health.repos.join(', ') || 'none') +
    (health.uptime ? ' · up ' + health.uptime : '');
  if (health.repos.length !== 1) return;
  const issues = await (await fetch('/issues')).json();
  const tbody = document.querySelector('#issues tbody');
  tbody.innerHTML = '';
  for (const issue of issues) {
    const row = document.createElement('tr');
    for (const value of [issue.id, issue.title, issue.status || 'open',
                         issue.priority, issue.owner || '']) {
      const cell = document.createElement('td');
      cell.textContent = value;
      row.appendChild(cell);
    }
    tbody.appendChild(row);
  }
}
refresh();
setInterval(refresh, 5000);
</script>
</body>
</html>
"#;
