//! Embedded assets for the web chat shell.

pub const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>Foreman</title>
  <link rel="stylesheet" href="/style.css">
</head>
<body>
  <div id="app">
    <header>
      <h1>Foreman</h1>
      <span id="status">connecting&hellip;</span>
    </header>
    <main id="messages"></main>
    <footer>
      <form id="composer">
        <input id="input" type="text" placeholder="Send a message to the manager" autocomplete="off">
        <button type="submit">Send</button>
      </form>
    </footer>
  </div>
  <script src="/app.js"></script>
</body>
</html>
"#;

pub const STYLE_CSS: &str = r#"* { box-sizing: border-box; margin: 0; }
body { font-family: system-ui, sans-serif; background: #111418; color: #e6e6e6; }
#app { display: flex; flex-direction: column; height: 100vh; max-width: 720px; margin: 0 auto; }
header { display: flex; justify-content: space-between; align-items: baseline; padding: 12px 16px; border-bottom: 1px solid #2a2f36; }
header h1 { font-size: 16px; }
#status { font-size: 12px; color: #8a939e; }
#messages { flex: 1; overflow-y: auto; padding: 16px; }
.msg { margin-bottom: 12px; padding: 10px 12px; border-radius: 8px; white-space: pre-wrap; }
.msg.user { background: #1d3250; margin-left: 15%; }
.msg.assistant { background: #1c2128; margin-right: 15%; }
.msg.step { background: #15191e; margin-right: 25%; border-left: 3px solid #4a79b8; font-size: 13px; }
.msg .who { display: block; font-size: 11px; color: #8a939e; margin-bottom: 4px; }
footer { padding: 12px 16px; border-top: 1px solid #2a2f36; }
#composer { display: flex; gap: 8px; }
#input { flex: 1; padding: 10px; border-radius: 6px; border: 1px solid #2a2f36; background: #1c2128; color: inherit; }
button { padding: 10px 16px; border-radius: 6px; border: none; background: #35639c; color: white; cursor: pointer; }
"#;

pub const APP_JS: &str = r#"(function () {
  const messages = document.getElementById('messages');
  const form = document.getElementById('composer');
  const input = document.getElementById('input');
  const status = document.getElementById('status');

  let chatId = localStorage.getItem('foreman-chat-id');
  if (!chatId) {
    chatId = crypto.randomUUID();
    localStorage.setItem('foreman-chat-id', chatId);
  }

  function addMessage(role, content, cls) {
    const div = document.createElement('div');
    div.className = 'msg ' + (cls || role);
    const who = document.createElement('span');
    who.className = 'who';
    who.textContent = role;
    div.appendChild(who);
    div.appendChild(document.createTextNode(content));
    messages.appendChild(div);
    messages.scrollTop = messages.scrollHeight;
  }

  const params = new URLSearchParams(window.location.search);
  const password = params.get('password');
  const proto = window.location.protocol === 'https:' ? 'wss' : 'ws';
  let url = proto + '://' + window.location.host + '/ws';
  if (password) url += '?password=' + encodeURIComponent(password);

  const ws = new WebSocket(url);

  ws.onopen = function () {
    status.textContent = 'connected';
    ws.send(JSON.stringify({ type: 'get_history', chatId: chatId }));
  };
  ws.onclose = function () { status.textContent = 'disconnected'; };

  ws.onmessage = function (event) {
    const msg = JSON.parse(event.data);
    if (msg.type === 'history' && msg.chatId === chatId) {
      (msg.messages || []).forEach(function (m) {
        const cls = (m.role === 'user' || m.role === 'assistant') ? m.role : 'step';
        addMessage(m.role, m.content, cls);
      });
    } else if (msg.type === 'message' && msg.chatId === chatId) {
      (msg.steps || []).forEach(function (s) {
        addMessage(s.role, s.response, 'step');
      });
      addMessage('assistant', msg.content);
    } else if (msg.type === 'error') {
      addMessage('error', msg.content, 'step');
    }
  };

  form.addEventListener('submit', function (e) {
    e.preventDefault();
    const content = input.value.trim();
    if (!content || ws.readyState !== WebSocket.OPEN) return;
    addMessage('user', content);
    ws.send(JSON.stringify({ type: 'message', chatId: chatId, content: content }));
    input.value = '';
  });
})();
"#;
