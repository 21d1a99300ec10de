use skua::http::{mime_type_for, Status};
use skua::parser::Request;
use skua::url_map::{Response, UrlMap};
use skua::{Config, Server};

fn hello(_req: &Request, resp: &mut Response) -> Status {
    resp.mime_type = "text/html";
    resp.body.extend_from_slice(b"<h1>Hello, World!</h1>");
    Status::Ok
}

fn server_status(_req: &Request, resp: &mut Response) -> Status {
    resp.body.extend_from_slice(b"ok\n");
    Status::Ok
}

fn assets(req: &Request, resp: &mut Response) -> Status {
    resp.mime_type = mime_type_for(req.path);
    resp.body.extend_from_slice(b"asset placeholder: ");
    resp.body.extend_from_slice(req.path.as_bytes());
    Status::Ok
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    skua::logging::init_logging();

    let mut url_map = UrlMap::new();
    url_map.add("/status", server_status);
    url_map.add("/assets", assets);
    url_map.add("/", hello);

    let server = Server::bind(Config::from_env())?;
    server.serve(url_map)?;
    Ok(())
}
